//! ---
//! imgpin_section: "01-core-functionality"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Shared primitives for settings, logging and run status."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::collections::BTreeSet;

use serde::Serialize;
use strum::{Display, EnumIter};

/// Exit code reported when more than one distinct error kind occurred.
pub const MULTIPLE_ERRORS_EXIT_CODE: u8 = 255;

/// Closed set of failure categories an update run can report.
///
/// Service-scoped kinds terminate the pipeline of one service only; the
/// process-scoped kinds (`MissingTool`, `Config`, `SystemError`) abort the run.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Display, EnumIter,
)]
pub enum ErrorKind {
    MissingTool,
    Config,
    SystemError,
    FileNotFound,
    ToolError,
    SnapshotError,
    EnvError,
    ImagePullError,
    ServiceRestartError,
    ResolutionError,
}

impl ErrorKind {
    /// Process exit code associated with this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::MissingTool => 3,
            ErrorKind::Config => 5,
            ErrorKind::SystemError => 10,
            ErrorKind::FileNotFound => 20,
            ErrorKind::ToolError => 30,
            ErrorKind::SnapshotError => 31,
            ErrorKind::EnvError => 32,
            ErrorKind::ImagePullError => 33,
            ErrorKind::ServiceRestartError => 34,
            ErrorKind::ResolutionError => 35,
        }
    }
}

/// Final status of a run, derived from the distinct error kinds encountered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    Success,
    Failed(ErrorKind),
    MultipleErrors,
}

impl RunStatus {
    /// Merge a set of error kinds into a single status.
    pub fn from_kinds(kinds: &BTreeSet<ErrorKind>) -> Self {
        let mut iter = kinds.iter();
        match (iter.next(), iter.next()) {
            (None, _) => RunStatus::Success,
            (Some(kind), None) => RunStatus::Failed(*kind),
            (Some(_), Some(_)) => RunStatus::MultipleErrors,
        }
    }

    pub fn exit_code(self) -> u8 {
        match self {
            RunStatus::Success => 0,
            RunStatus::Failed(kind) => kind.exit_code(),
            RunStatus::MultipleErrors => MULTIPLE_ERRORS_EXIT_CODE,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunStatus::Success => f.write_str("success"),
            RunStatus::Failed(kind) => write!(f, "{kind}"),
            RunStatus::MultipleErrors => f.write_str("multiple errors"),
        }
    }
}

/// Failure that aborts the whole run before or outside the per-service pipeline.
#[derive(Debug, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct FatalError {
    pub kind: ErrorKind,
    pub message: String,
}

impl FatalError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind.exit_code()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use strum::IntoEnumIterator;

    use super::*;

    #[test]
    fn exit_codes_are_unique_and_nonzero() {
        let mut seen = HashSet::new();
        for kind in ErrorKind::iter() {
            let code = kind.exit_code();
            assert_ne!(code, 0, "{kind} must not map to success");
            assert_ne!(code, MULTIPLE_ERRORS_EXIT_CODE);
            assert!(seen.insert(code), "exit code {code} reused by {kind}");
        }
    }

    #[test]
    fn merge_reports_single_and_multiple_kinds() {
        let mut kinds = BTreeSet::new();
        assert_eq!(RunStatus::from_kinds(&kinds), RunStatus::Success);
        assert_eq!(RunStatus::from_kinds(&kinds).exit_code(), 0);

        kinds.insert(ErrorKind::ImagePullError);
        assert_eq!(
            RunStatus::from_kinds(&kinds),
            RunStatus::Failed(ErrorKind::ImagePullError)
        );
        assert_eq!(RunStatus::from_kinds(&kinds).exit_code(), 33);

        kinds.insert(ErrorKind::ImagePullError);
        assert_eq!(RunStatus::from_kinds(&kinds).exit_code(), 33);

        kinds.insert(ErrorKind::EnvError);
        assert_eq!(RunStatus::from_kinds(&kinds), RunStatus::MultipleErrors);
        assert_eq!(RunStatus::from_kinds(&kinds).exit_code(), 255);
    }

    #[test]
    fn kind_names_render_as_variant_names() {
        assert_eq!(ErrorKind::ServiceRestartError.to_string(), "ServiceRestartError");
        assert_eq!(
            RunStatus::Failed(ErrorKind::ToolError).to_string(),
            "ToolError"
        );
    }
}

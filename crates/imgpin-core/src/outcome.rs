//! ---
//! imgpin_section: "06-orchestration"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service discovery, the per-service update pipeline and run wiring."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::collections::BTreeSet;
use std::path::PathBuf;

use imgpin_common::{ErrorKind, RunStatus};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceOutcome {
    /// Every digest already matched; nothing was touched.
    Unchanged,
    /// New digests were written and every enabled step succeeded.
    Updated,
    Failed(ErrorKind),
}

/// A hashed reference that moved during resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageChange {
    pub name: String,
    pub reference: String,
    pub previous: Option<String>,
    pub current: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub dir: PathBuf,
    pub outcome: ServiceOutcome,
    pub changes: Vec<ImageChange>,
}

impl ServiceReport {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self.outcome {
            ServiceOutcome::Failed(kind) => Some(kind),
            _ => None,
        }
    }
}

/// Per-service results of one run, in discovery order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub services: Vec<ServiceReport>,
}

impl RunReport {
    /// Distinct error kinds across all services.
    pub fn error_kinds(&self) -> BTreeSet<ErrorKind> {
        self.services
            .iter()
            .filter_map(ServiceReport::error_kind)
            .collect()
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_kinds(&self.error_kinds())
    }

    pub fn service(&self, name: &str) -> Option<&ServiceReport> {
        self.services.iter().find(|report| report.name == name)
    }

    pub fn count(&self, outcome: ServiceOutcome) -> usize {
        self.services
            .iter()
            .filter(|report| report.outcome == outcome)
            .count()
    }
}

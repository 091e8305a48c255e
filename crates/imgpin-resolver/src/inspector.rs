//! ---
//! imgpin_section: "04-digest-resolution"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Tag to digest resolution through the registry tool and a persisted cache."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::sync::Arc;

use imgpin_tools::{CommandRunner, ToolCommand, ToolError};
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, thiserror::Error)]
pub enum ResolutionError {
    #[error("could not run registry tool for {reference}: {source}")]
    Tool {
        reference: String,
        source: ToolError,
    },
    #[error("registry tool failed for {reference} (code {code:?}): {stderr}")]
    Failed {
        reference: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("registry tool returned unreadable output for {reference}: {source}")]
    Parse {
        reference: String,
        source: serde_json::Error,
    },
    #[error("registry tool output for {reference} lacks the {field} field")]
    MissingField {
        reference: String,
        field: &'static str,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectOutput {
    name: Option<String>,
    digest: Option<String>,
}

/// Asks the registry tool (`skopeo` by default) for the digest behind a tag.
#[derive(Clone)]
pub struct RegistryInspector {
    runner: Arc<dyn CommandRunner>,
    tool: ToolCommand,
    transport: String,
}

impl RegistryInspector {
    pub fn new(runner: Arc<dyn CommandRunner>, tool: ToolCommand, transport: impl Into<String>) -> Self {
        Self {
            runner,
            tool,
            transport: transport.into(),
        }
    }

    /// Resolve `reference` (e.g. `ghcr.io/org/app:latest`) to `<name>@<digest>`.
    pub fn inspect(&self, reference: &str) -> Result<String, ResolutionError> {
        let target = format!("{}://{}", self.transport, reference);
        let invocation = self.tool.invocation(["inspect", "--no-tags", target.as_str()]);
        let output = self
            .runner
            .run(&invocation)
            .map_err(|source| ResolutionError::Tool {
                reference: reference.to_owned(),
                source,
            })?;
        if !output.success() {
            return Err(ResolutionError::Failed {
                reference: reference.to_owned(),
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            });
        }

        let parsed: InspectOutput =
            serde_json::from_str(&output.stdout).map_err(|source| ResolutionError::Parse {
                reference: reference.to_owned(),
                source,
            })?;
        let name = parsed.name.ok_or_else(|| ResolutionError::MissingField {
            reference: reference.to_owned(),
            field: "Name",
        })?;
        let digest = parsed.digest.ok_or_else(|| ResolutionError::MissingField {
            reference: reference.to_owned(),
            field: "Digest",
        })?;
        let result = format!("{name}@{digest}");
        debug!(reference, result = %result, "resolved by registry lookup");
        Ok(result)
    }
}

impl std::fmt::Debug for RegistryInspector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryInspector")
            .field("tool", &self.tool)
            .field("transport", &self.transport)
            .finish_non_exhaustive()
    }
}

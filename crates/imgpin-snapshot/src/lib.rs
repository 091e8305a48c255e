//! ---
//! imgpin_section: "05-snapshots"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Snapper configuration lookup and snapshot creation."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Snapshots of a service directory before its environment file changes.
//!
//! Operators configure snapper per subvolume; imgpin only knows directories.
//! [`Snapper`] reads the configured bindings once and picks the configuration
//! whose subvolume is the service directory.

use std::borrow::Cow;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use imgpin_tools::{CommandRunner, ToolCommand, ToolError};
use path_absolutize::Absolutize;
use serde::Deserialize;
use tracing::{debug, info, trace};

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("could not run snapshot tool: {0}")]
    Tool(#[from] ToolError),
    #[error("listing snapshot configs failed (code {code:?}): {stderr}")]
    ListFailed { code: Option<i32>, stderr: String },
    #[error("unreadable snapshot config listing: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no snapshot config covers {}", .path.display())]
    ConfigNotFound { path: PathBuf },
    #[error("snapshot with config {config} failed (code {code:?})")]
    CreateFailed { config: String, code: Option<i32> },
    #[error("could not resolve path {}: {source}", .path.display())]
    Path {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// A snapper configuration and the subvolume it manages.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SnapshotBinding {
    #[serde(rename = "config")]
    pub config_name: String,
    pub subvolume: PathBuf,
}

#[derive(Debug, Deserialize)]
struct ConfigListing {
    configs: Vec<SnapshotBinding>,
}

pub struct Snapper {
    runner: Arc<dyn CommandRunner>,
    tool: ToolCommand,
    bindings: Vec<SnapshotBinding>,
}

impl Snapper {
    /// Query `<tool> --jsonout list-configs` once.
    pub fn load(runner: Arc<dyn CommandRunner>, tool: ToolCommand) -> Result<Self, SnapshotError> {
        let output = runner.run(&tool.invocation(["--jsonout", "list-configs"]))?;
        if !output.success() {
            return Err(SnapshotError::ListFailed {
                code: output.code,
                stderr: output.stderr.trim().to_owned(),
            });
        }
        let listing: ConfigListing = serde_json::from_str(&output.stdout)?;
        debug!(configs = listing.configs.len(), "loaded snapshot configs");
        trace!(bindings = ?listing.configs);
        Ok(Self {
            runner,
            tool,
            bindings: listing.configs,
        })
    }

    pub fn bindings(&self) -> &[SnapshotBinding] {
        &self.bindings
    }

    /// Name of the first configuration whose subvolume is `path`.
    pub fn config_for(&self, path: &Path) -> Result<&str, SnapshotError> {
        let wanted = canonical(path)?;
        for binding in &self.bindings {
            if canonical(&binding.subvolume)? == wanted {
                return Ok(&binding.config_name);
            }
        }
        Err(SnapshotError::ConfigNotFound {
            path: path.to_path_buf(),
        })
    }

    /// Create a snapshot of `path`; the tool's own output goes to the terminal.
    pub fn snapshot(&self, path: &Path, message: &str) -> Result<(), SnapshotError> {
        let config = self.config_for(path)?.to_owned();
        info!(config = %config, path = %path.display(), "creating snapshot");
        let invocation = self
            .tool
            .invocation(["-c", config.as_str(), "create", "--description", message])
            .inherit_output();
        let output = self.runner.run(&invocation)?;
        if !output.success() {
            return Err(SnapshotError::CreateFailed {
                config,
                code: output.code,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for Snapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapper")
            .field("tool", &self.tool)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

/// Symlink-resolved form of `path`, or its absolute form when it does not exist.
fn canonical(path: &Path) -> Result<PathBuf, SnapshotError> {
    if let Ok(resolved) = fs::canonicalize(path) {
        return Ok(resolved);
    }
    path.absolutize()
        .map(Cow::into_owned)
        .map_err(|source| SnapshotError::Path {
            path: path.to_path_buf(),
            source,
        })
}

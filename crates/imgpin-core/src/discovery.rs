//! ---
//! imgpin_section: "06-orchestration"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service discovery, the per-service update pipeline and run wiring."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("services root {} is not a directory", .path.display())]
    NotADirectory { path: PathBuf },
    #[error("could not list services under {}: {source}", .path.display())]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },
}

/// Include and exclude lists of service directory names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServiceFilter {
    include: Vec<String>,
    exclude: Vec<String>,
}

impl ServiceFilter {
    /// Parse comma separated lists; an empty include list admits everything.
    pub fn parse(include: &str, exclude: &str) -> Self {
        Self {
            include: split_list(include),
            exclude: split_list(exclude),
        }
    }

    pub fn allows(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|item| item == name);
        included && !self.exclude.iter().any(|item| item == name)
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_owned)
        .collect()
}

/// Immediate subdirectories of `root` holding both a compose descriptor and
/// an environment file, sorted by name.
pub fn discover(
    root: &Path,
    descriptor_file: &str,
    env_file: &str,
    filter: &ServiceFilter,
) -> Result<Vec<PathBuf>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::NotADirectory {
            path: root.to_path_buf(),
        });
    }

    let mut services = Vec::new();
    for entry in WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .follow_links(true)
        .sort_by_file_name()
    {
        let entry = match entry {
            Ok(entry) => entry,
            Err(source) if source.depth() == 0 => {
                return Err(DiscoveryError::Walk {
                    path: root.to_path_buf(),
                    source,
                });
            }
            Err(err) => {
                warn!(path = ?err.path(), error = %err, "skipping unreadable service candidate");
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }
        let dir = entry.into_path();
        if !dir.join(descriptor_file).is_file() {
            continue;
        }
        let name = dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        if !filter.allows(&name) {
            debug!(service = %name, "skipped by service filter");
            continue;
        }
        if !dir.join(env_file).is_file() {
            debug!(service = %name, env_file, "no environment file, not managed");
            continue;
        }
        services.push(dir);
    }
    debug!(root = %root.display(), count = services.len(), "discovered services");
    Ok(services)
}

//! ---
//! imgpin_section: "06-orchestration"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service discovery, the per-service update pipeline and run wiring."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::sync::Arc;

use imgpin_common::{ErrorKind, FatalError, Settings};
use imgpin_resolver::{DigestCache, RegistryInspector};
use imgpin_snapshot::Snapper;
use imgpin_tools::{check_dependencies, CommandRunner, ToolCommand};
use tracing::{debug, error, info, warn};

use crate::discovery::{discover, ServiceFilter};
use crate::outcome::RunReport;
use crate::updater::Updater;

/// Run one full update pass over every discovered service.
///
/// Errors returned here abort the run before any service was touched; per
/// service failures are reported inside the [`RunReport`].
pub fn run_update(
    settings: &Settings,
    runner: Arc<dyn CommandRunner>,
) -> Result<RunReport, FatalError> {
    let registry = tool("REGISTRY_TOOL", &settings.registry_tool)?;
    let compose = tool("COMPOSE_TOOL", &settings.compose_tool)?;
    let snapshot = tool("SNAPSHOT_TOOL", &settings.snapshot_tool)?;
    let container = tool("CONTAINER_TOOL", &settings.container_tool)?;

    if settings.service_stop_start && !settings.stop_start_method.is_known() {
        warn!(
            method = %settings.stop_start_method,
            "unknown STOP_START_METHOD; changed services will fail at the restart step"
        );
    }

    let mut required = vec![registry.program()];
    if settings.service_stop_start {
        required.push(compose.program());
    } else {
        debug!("stop/start disabled, compose tool not required");
    }
    if settings.service_snapshot {
        required.push(snapshot.program());
    } else {
        debug!("snapshots disabled, snapshot tool not required");
    }
    if settings.prune_images {
        required.push(container.program());
    }
    check_dependencies(runner.as_ref(), required)
        .map_err(|err| FatalError::new(ErrorKind::MissingTool, err.to_string()))?;

    if settings.prune_images {
        prune_images(runner.as_ref(), &container);
    }

    let inspector = RegistryInspector::new(runner.clone(), registry, settings.registry_transport.clone());
    let cache = DigestCache::open(&settings.cache_location, settings.cache_duration, inspector);

    let snapper = if settings.service_snapshot {
        let snapper = Snapper::load(runner.clone(), snapshot)
            .map_err(|err| FatalError::new(ErrorKind::SnapshotError, err.to_string()))?;
        Some(snapper)
    } else {
        None
    };

    let filter = ServiceFilter::parse(&settings.services_filter, &settings.services_exclude);
    let services = discover(
        &settings.services_root,
        &settings.compose_file_name,
        &settings.env_file_name,
        &filter,
    )
    .map_err(|err| FatalError::new(ErrorKind::FileNotFound, err.to_string()))?;
    info!(count = services.len(), root = %settings.services_root.display(), "services discovered");

    let mut updater = Updater::new(settings.clone(), runner, cache, snapper)?;
    Ok(updater.update_all(&services))
}

fn tool(setting: &str, raw: &str) -> Result<ToolCommand, FatalError> {
    ToolCommand::parse(raw)
        .map_err(|err| FatalError::new(ErrorKind::Config, format!("setting {setting}: {err}")))
}

fn prune_images(runner: &dyn CommandRunner, container: &ToolCommand) {
    info!("pruning images");
    let invocation = container.invocation(["image", "prune", "-f"]).inherit_output();
    match runner.run(&invocation) {
        Ok(output) if output.success() => {}
        Ok(output) => error!(code = ?output.code, "failed to prune images"),
        Err(err) => error!(error = %err, "failed to prune images"),
    }
}

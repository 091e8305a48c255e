//! ---
//! imgpin_section: "06-orchestration"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service discovery, the per-service update pipeline and run wiring."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! The per-service update pipeline.
//!
//! Steps run strictly in order and the first failure ends the pipeline for
//! that service only:
//!
//! 1. load the environment file
//! 2. resolve every tagged image and record moved digests in memory
//! 3. stop here when nothing moved
//! 4. probe that the compose tool is usable (`ps`)
//! 5. snapshot the service directory
//! 6. write the environment file
//! 7. pull images
//! 8. restart the service
//!
//! The snapshot always precedes the write, so a failed snapshot leaves the
//! file on disk as it was.
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Local;
use imgpin_common::{ErrorKind, FatalError, RestartMethod, Settings};
use imgpin_envfile::{interpolate, EnvFileError, EnvRecord, ImageKey, ImageKeyKind};
use imgpin_resolver::{DigestCache, ResolutionError};
use imgpin_snapshot::{SnapshotError, Snapper};
use imgpin_tools::{CommandRunner, Invocation, ToolCommand, ToolError};
use strum::Display;
use tracing::{debug, error, info, info_span};

use crate::outcome::{ImageChange, RunReport, ServiceOutcome, ServiceReport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "kebab-case")]
pub enum Step {
    LoadEnvironment,
    ResolveImages,
    PermissionProbe,
    Snapshot,
    PersistEnvironment,
    Pull,
    Restart,
}

/// Why a service's pipeline stopped.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error("environment file {} not found", .path.display())]
    EnvMissing { path: PathBuf },
    #[error("could not load environment: {0}")]
    EnvLoad(#[source] EnvFileError),
    #[error("could not write environment: {0}")]
    EnvWrite(#[source] EnvFileError),
    #[error("could not resolve {key}: {source}")]
    Resolution {
        key: String,
        source: ResolutionError,
    },
    #[error("{step} could not run its tool: {source}")]
    Tool { step: Step, source: ToolError },
    #[error("{step} command `{command}` exited with code {code:?}")]
    Command {
        step: Step,
        command: String,
        code: Option<i32>,
    },
    #[error("snapshots are enabled but no snapshot tool was loaded")]
    SnapshotUnavailable,
    #[error("snapshot failed: {0}")]
    Snapshot(#[source] SnapshotError),
    #[error("unknown restart method {method:?}")]
    UnknownRestartMethod { method: String },
}

impl UpdateError {
    pub fn step(&self) -> Step {
        match self {
            UpdateError::EnvMissing { .. } | UpdateError::EnvLoad(_) => Step::LoadEnvironment,
            UpdateError::EnvWrite(_) => Step::PersistEnvironment,
            UpdateError::Resolution { .. } => Step::ResolveImages,
            UpdateError::Tool { step, .. } | UpdateError::Command { step, .. } => *step,
            UpdateError::SnapshotUnavailable | UpdateError::Snapshot(_) => Step::Snapshot,
            UpdateError::UnknownRestartMethod { .. } => Step::Restart,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            UpdateError::EnvMissing { .. } => ErrorKind::FileNotFound,
            _ => match self.step() {
                Step::LoadEnvironment | Step::PersistEnvironment => ErrorKind::EnvError,
                Step::ResolveImages => ErrorKind::ResolutionError,
                Step::PermissionProbe => ErrorKind::ToolError,
                Step::Snapshot => ErrorKind::SnapshotError,
                Step::Pull => ErrorKind::ImagePullError,
                Step::Restart => ErrorKind::ServiceRestartError,
            },
        }
    }

    fn code(&self) -> Option<i32> {
        match self {
            UpdateError::Command { code, .. } => *code,
            _ => None,
        }
    }
}

/// Drives the update pipeline for each service directory.
pub struct Updater {
    settings: Settings,
    runner: Arc<dyn CommandRunner>,
    cache: DigestCache,
    snapper: Option<Snapper>,
    compose: ToolCommand,
    service_manager: ToolCommand,
}

impl Updater {
    pub fn new(
        settings: Settings,
        runner: Arc<dyn CommandRunner>,
        cache: DigestCache,
        snapper: Option<Snapper>,
    ) -> Result<Self, FatalError> {
        let compose = parse_tool("COMPOSE_TOOL", &settings.compose_tool)?;
        let service_manager = parse_tool("SERVICE_MANAGER", &settings.service_manager)?;
        Ok(Self {
            settings,
            runner,
            cache,
            snapper,
            compose,
            service_manager,
        })
    }

    pub fn cache(&self) -> &DigestCache {
        &self.cache
    }

    /// Update every service in order. No failure stops the remaining services.
    pub fn update_all(&mut self, dirs: &[PathBuf]) -> RunReport {
        let services = dirs.iter().map(|dir| self.update_service(dir)).collect();
        let report = RunReport { services };
        info!(
            services = report.services.len(),
            updated = report.count(ServiceOutcome::Updated),
            unchanged = report.count(ServiceOutcome::Unchanged),
            status = %report.status(),
            "update run finished"
        );
        report
    }

    pub fn update_service(&mut self, dir: &Path) -> ServiceReport {
        let name = service_name(dir);
        let span = info_span!("service", service = %name);
        let _entered = span.enter();
        info!(dir = %dir.display(), "working on service");

        let mut changes = Vec::new();
        let outcome = match self.run_pipeline(dir, &name, &mut changes) {
            Ok(outcome) => outcome,
            Err(err) => {
                error!(
                    step = %err.step(),
                    kind = %err.kind(),
                    code = ?err.code(),
                    error = %err,
                    "cannot update service"
                );
                ServiceOutcome::Failed(err.kind())
            }
        };
        ServiceReport {
            name,
            dir: dir.to_path_buf(),
            outcome,
            changes,
        }
    }

    fn run_pipeline(
        &mut self,
        dir: &Path,
        name: &str,
        changes: &mut Vec<ImageChange>,
    ) -> Result<ServiceOutcome, UpdateError> {
        let env_path = dir.join(&self.settings.env_file_name);
        let mut record = EnvRecord::load(&env_path).map_err(|err| match err {
            EnvFileError::NotFound { path } => UpdateError::EnvMissing { path },
            other => UpdateError::EnvLoad(other),
        })?;

        self.resolve_images(&mut record, changes)?;

        if !record.has_changes() {
            info!("no changes, done");
            return Ok(ServiceOutcome::Unchanged);
        }
        info!(changes = changes.len(), "changes pending");

        self.probe_compose(dir)?;
        self.take_snapshot(dir)?;

        info!(path = %record.path().display(), "writing updated environment");
        record.write().map_err(UpdateError::EnvWrite)?;

        if self.settings.service_pull {
            info!("pulling images");
            self.compose_step(Step::Pull, dir, &["pull"])?;
        }
        if self.settings.service_stop_start {
            self.restart(dir, name)?;
        }
        Ok(ServiceOutcome::Updated)
    }

    fn resolve_images(
        &mut self,
        record: &mut EnvRecord,
        changes: &mut Vec<ImageChange>,
    ) -> Result<(), UpdateError> {
        let keys: Vec<String> = record.keys().map(str::to_owned).collect();
        for key in keys {
            let Some(image_key) = ImageKey::parse(&key) else {
                continue;
            };
            if image_key.kind() != ImageKeyKind::Tagged {
                continue;
            }
            let raw = record.get_or(&key, "").to_owned();
            let reference = interpolate(&raw, record).into_owned();
            if reference != raw {
                debug!(raw = %raw, reference = %reference, "interpolated image reference");
            }

            let hashed_key = image_key.counterpart().to_string();
            let previous = record.get(&hashed_key).map(str::to_owned);
            let current = self
                .cache
                .resolve(&reference)
                .map_err(|source| UpdateError::Resolution {
                    key: key.clone(),
                    source,
                })?;

            if previous.as_deref() == Some(current.as_str()) {
                info!(image = image_key.name(), reference = %reference, digest = %current, "image unchanged");
                continue;
            }
            info!(
                image = image_key.name(),
                reference = %reference,
                previous = ?previous,
                digest = %current,
                "image moved"
            );
            record.set(hashed_key, current.clone());
            changes.push(ImageChange {
                name: image_key.name().to_owned(),
                reference,
                previous,
                current,
            });
        }
        Ok(())
    }

    fn probe_compose(&self, dir: &Path) -> Result<(), UpdateError> {
        debug!(tool = %self.compose, "checking compose tool permissions");
        let invocation = self.compose.invocation(["ps"]).in_dir(dir);
        self.run_checked(Step::PermissionProbe, &invocation)
    }

    fn take_snapshot(&self, dir: &Path) -> Result<(), UpdateError> {
        if !self.settings.service_snapshot {
            return Ok(());
        }
        let snapper = self
            .snapper
            .as_ref()
            .ok_or(UpdateError::SnapshotUnavailable)?;
        let message = format!(
            "Update container images {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f")
        );
        snapper
            .snapshot(dir, &message)
            .map_err(UpdateError::Snapshot)
    }

    fn restart(&self, dir: &Path, name: &str) -> Result<(), UpdateError> {
        match &self.settings.stop_start_method {
            RestartMethod::Compose => {
                info!("stopping service");
                self.compose_step(Step::Restart, dir, &["down"])?;
                info!("starting service");
                self.compose_step(Step::Restart, dir, &["up", "-d"])
            }
            method @ (RestartMethod::SystemdSystem | RestartMethod::SystemdUser) => {
                let unit = format!("{}@{}", self.compose.unit_prefix(), name);
                info!(unit = %unit, method = %method, "restarting unit");
                let mut args = Vec::new();
                if method.is_user_scoped() {
                    args.push("--user");
                }
                args.extend(["restart", unit.as_str()]);
                let invocation = self
                    .service_manager
                    .invocation(args)
                    .in_dir(dir)
                    .inherit_output();
                self.run_checked(Step::Restart, &invocation)
            }
            RestartMethod::Unknown(method) => Err(UpdateError::UnknownRestartMethod {
                method: method.clone(),
            }),
        }
    }

    fn compose_step(&self, step: Step, dir: &Path, args: &[&str]) -> Result<(), UpdateError> {
        let invocation = self
            .compose
            .invocation(args.iter().copied())
            .in_dir(dir)
            .inherit_output();
        self.run_checked(step, &invocation)
    }

    fn run_checked(&self, step: Step, invocation: &Invocation) -> Result<(), UpdateError> {
        let output = self
            .runner
            .run(invocation)
            .map_err(|source| UpdateError::Tool { step, source })?;
        if output.success() {
            Ok(())
        } else {
            Err(UpdateError::Command {
                step,
                command: invocation.command_line(),
                code: output.code,
            })
        }
    }
}

fn parse_tool(setting: &str, raw: &str) -> Result<ToolCommand, FatalError> {
    ToolCommand::parse(raw).map_err(|err| {
        FatalError::new(ErrorKind::Config, format!("setting {setting}: {err}"))
    })
}

fn service_name(dir: &Path) -> String {
    dir.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| dir.display().to_string())
}

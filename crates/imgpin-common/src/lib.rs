//! ---
//! imgpin_section: "01-core-functionality"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Shared primitives for settings, logging and run status."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Shared primitives for the imgpin workspace.
//! This crate exposes settings loading, tracing initialisation and the
//! error-kind taxonomy used to report the outcome of an update run.

pub mod logging;
pub mod settings;
pub mod status;

pub use logging::{init_tracing, LogFormat, LoggingGuard};
pub use settings::{RestartMethod, Settings, SettingsError, ENV_PREFIX};
pub use status::{ErrorKind, FatalError, RunStatus};

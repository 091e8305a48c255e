//! ---
//! imgpin_section: "06-orchestration"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Service discovery, the per-service update pipeline and run wiring."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Update orchestration for compose-managed services.
//!
//! [`run_update`] performs the process-wide preparation (dependency check,
//! image pruning, cache and snapshot setup, discovery) and hands every
//! discovered service to [`Updater`], whose failures stay scoped to the
//! service they occurred in.

pub mod app;
pub mod discovery;
pub mod outcome;
pub mod updater;

pub use app::run_update;
pub use discovery::{discover, DiscoveryError, ServiceFilter};
pub use outcome::{ImageChange, RunReport, ServiceOutcome, ServiceReport};
pub use updater::{Step, UpdateError, Updater};

//! ---
//! imgpin_section: "02-external-tools"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "External command abstraction shared by the resolver, snapshot and core crates."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Every external program imgpin talks to is reached through [`CommandRunner`].
//! Production code uses [`SystemRunner`]; tests swap in
//! [`fake::RecordingRunner`], which answers from canned rules and keeps an
//! ordered log of the command lines it was asked to run.

pub mod command;
pub mod fake;
pub mod runner;

pub use command::{Invocation, OutputMode, ToolCommand, ToolOutput};
pub use runner::{check_dependencies, CommandRunner, SystemRunner, ToolError};

//! ---
//! imgpin_section: "02-external-tools"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "External command abstraction shared by the resolver, snapshot and core crates."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::io;
use std::process::{Command, Stdio};

use tracing::{debug, trace};

use crate::command::{Invocation, OutputMode, ToolOutput};

/// Failures to run an external program at all. A program that runs and exits
/// non-zero is not an error at this layer; callers inspect [`ToolOutput`].
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("command is empty")]
    EmptyCommand,
    #[error("program {program} was not found")]
    Missing { program: String },
    #[error("failed to run {program}: {source}")]
    Spawn { program: String, source: io::Error },
    #[error("{program} --version exited with {}", describe_exit(.code))]
    VersionCheck { program: String, code: Option<i32> },
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {code}"),
        None => "a signal".to_owned(),
    }
}

/// Seam between imgpin and the processes it launches.
pub trait CommandRunner: Send + Sync {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError>;
}

/// Runs programs with [`std::process::Command`], blocking until they exit.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl SystemRunner {
    pub fn new() -> Self {
        Self
    }
}

impl CommandRunner for SystemRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        debug!(command = %invocation.command_line(), cwd = ?invocation.cwd, "running tool");
        let mut command = Command::new(&invocation.program);
        command.args(&invocation.args).stdin(Stdio::null());
        if let Some(dir) = &invocation.cwd {
            command.current_dir(dir);
        }

        let spawn_error = |source: io::Error| {
            if source.kind() == io::ErrorKind::NotFound {
                ToolError::Missing {
                    program: invocation.program.clone(),
                }
            } else {
                ToolError::Spawn {
                    program: invocation.program.clone(),
                    source,
                }
            }
        };

        let output = match invocation.output {
            OutputMode::Capture => {
                let output = command.output().map_err(spawn_error)?;
                ToolOutput {
                    code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                    stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
                }
            }
            OutputMode::Inherit => {
                let status = command.status().map_err(spawn_error)?;
                ToolOutput {
                    code: status.code(),
                    ..ToolOutput::default()
                }
            }
        };
        trace!(code = ?output.code, "tool finished");
        Ok(output)
    }
}

/// Confirm each program can be launched by asking it for `--version`.
pub fn check_dependencies<'a, I>(runner: &dyn CommandRunner, programs: I) -> Result<(), ToolError>
where
    I: IntoIterator<Item = &'a str>,
{
    for program in programs {
        let output = runner.run(&Invocation::new(program, ["--version"]))?;
        if !output.success() {
            return Err(ToolError::VersionCheck {
                program: program.to_owned(),
                code: output.code,
            });
        }
        debug!(program, version = %output.stdout.trim(), "dependency available");
    }
    Ok(())
}

//! ---
//! imgpin_section: "02-external-tools"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "External command abstraction shared by the resolver, snapshot and core crates."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::fmt;
use std::path::{Path, PathBuf};

use crate::runner::ToolError;

/// A possibly multi-token command prefix such as `podman-compose` or
/// `docker compose`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCommand {
    tokens: Vec<String>,
}

impl ToolCommand {
    /// Split a configured command on whitespace.
    pub fn parse(raw: &str) -> Result<Self, ToolError> {
        let tokens: Vec<String> = raw.split_whitespace().map(str::to_owned).collect();
        if tokens.is_empty() {
            return Err(ToolError::EmptyCommand);
        }
        Ok(Self { tokens })
    }

    /// The executable, i.e. the first token.
    pub fn program(&self) -> &str {
        &self.tokens[0]
    }

    /// Tokens joined by `-`, used as the templated systemd unit prefix.
    pub fn unit_prefix(&self) -> String {
        self.tokens.join("-")
    }

    /// Build an invocation of this command followed by `args`.
    pub fn invocation<I, S>(&self, args: I) -> Invocation
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut all: Vec<String> = self.tokens[1..].to_vec();
        all.extend(args.into_iter().map(Into::into));
        Invocation::new(self.program(), all)
    }
}

impl fmt::Display for ToolCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tokens.join(" "))
    }
}

/// Whether the child's stdout/stderr are captured or passed through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputMode {
    #[default]
    Capture,
    Inherit,
}

/// One fully specified program run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub cwd: Option<PathBuf>,
    pub output: OutputMode,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            cwd: None,
            output: OutputMode::Capture,
        }
    }

    pub fn in_dir(mut self, dir: &Path) -> Self {
        self.cwd = Some(dir.to_path_buf());
        self
    }

    pub fn inherit_output(mut self) -> Self {
        self.output = OutputMode::Inherit;
        self
    }

    /// Program and arguments joined by single spaces, unquoted.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }
}

/// Exit status and captured streams of a finished program.
///
/// Streams are empty when the invocation inherited the parent's stdio.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ToolOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl ToolOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            code: Some(0),
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(code: i32, stderr: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

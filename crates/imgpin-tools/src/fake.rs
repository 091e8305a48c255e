//! ---
//! imgpin_section: "02-external-tools"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "External command abstraction shared by the resolver, snapshot and core crates."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
//! Deterministic [`CommandRunner`] for tests: no process is ever spawned.

use std::fmt;

use parking_lot::Mutex;

use crate::command::{Invocation, ToolOutput};
use crate::runner::{CommandRunner, ToolError};

#[derive(Debug, Clone)]
enum Response {
    Output(ToolOutput),
    Missing,
}

#[derive(Debug, Clone)]
struct Rule {
    prefix: String,
    response: Response,
}

type Hook = Box<dyn Fn(&Invocation) + Send + Sync>;

/// Answers invocations from prefix rules and records every command line.
///
/// Rules are matched against [`Invocation::command_line`]; the most recently
/// added matching rule wins. Unmatched invocations succeed with empty output.
#[derive(Default)]
pub struct RecordingRunner {
    rules: Mutex<Vec<Rule>>,
    hooks: Mutex<Vec<(String, Hook)>>,
    log: Mutex<Vec<Invocation>>,
}

impl fmt::Debug for RecordingRunner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingRunner")
            .field("rules", &self.rules.lock())
            .field("hooks", &self.hooks.lock().len())
            .field("log", &self.log.lock())
            .finish()
    }
}

impl RecordingRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, prefix: &str, output: ToolOutput) -> &Self {
        self.rules.lock().push(Rule {
            prefix: prefix.to_owned(),
            response: Response::Output(output),
        });
        self
    }

    /// Make matching invocations fail as if the program were not installed.
    pub fn respond_missing(&self, prefix: &str) -> &Self {
        self.rules.lock().push(Rule {
            prefix: prefix.to_owned(),
            response: Response::Missing,
        });
        self
    }

    /// Run `hook` before answering every invocation starting with `prefix`,
    /// for tests that change the filesystem between pipeline steps.
    pub fn on_run<F>(&self, prefix: &str, hook: F) -> &Self
    where
        F: Fn(&Invocation) + Send + Sync + 'static,
    {
        self.hooks.lock().push((prefix.to_owned(), Box::new(hook)));
        self
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.log.lock().clone()
    }

    pub fn command_lines(&self) -> Vec<String> {
        self.log.lock().iter().map(Invocation::command_line).collect()
    }

    /// Number of recorded command lines starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.log
            .lock()
            .iter()
            .filter(|invocation| invocation.command_line().starts_with(prefix))
            .count()
    }

    pub fn clear_log(&self) {
        self.log.lock().clear();
    }
}

impl CommandRunner for RecordingRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput, ToolError> {
        self.log.lock().push(invocation.clone());
        let line = invocation.command_line();
        for (prefix, hook) in self.hooks.lock().iter() {
            if line.starts_with(prefix.as_str()) {
                hook(invocation);
            }
        }
        let rules = self.rules.lock();
        let response = rules
            .iter()
            .rev()
            .find(|rule| line.starts_with(&rule.prefix))
            .map(|rule| rule.response.clone());
        match response {
            Some(Response::Output(output)) => Ok(output),
            Some(Response::Missing) => Err(ToolError::Missing {
                program: invocation.program.clone(),
            }),
            None => Ok(ToolOutput::ok("")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_matching_rule_wins() {
        let runner = RecordingRunner::new();
        runner
            .respond("podman-compose", ToolOutput::failed(1, "generic"))
            .respond("podman-compose ps", ToolOutput::ok("listing"));

        let ps = runner.run(&Invocation::new("podman-compose", ["ps"])).unwrap();
        assert_eq!(ps.stdout, "listing");
        let pull = runner.run(&Invocation::new("podman-compose", ["pull"])).unwrap();
        assert_eq!(pull.code, Some(1));
        let other = runner.run(&Invocation::new("systemctl", ["restart", "x"])).unwrap();
        assert!(other.success());

        assert_eq!(runner.count("podman-compose"), 2);
        assert_eq!(
            runner.command_lines(),
            vec!["podman-compose ps", "podman-compose pull", "systemctl restart x"]
        );
    }

    #[test]
    fn hooks_run_before_the_response() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        let seen = Arc::new(AtomicUsize::new(0));
        let runner = RecordingRunner::new();
        let counter = seen.clone();
        runner.on_run("snapper", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        runner.run(&Invocation::new("snapper", ["list-configs"])).unwrap();
        runner.run(&Invocation::new("skopeo", ["inspect"])).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }
}

//! ---
//! imgpin_section: "01-core-functionality"
//! imgpin_subsection: "module"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Shared primitives for settings, logging and run status."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt as subscriber_fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

const LOG_ENV: &str = "IMGPIN_LOG";
const LOG_FILE_NAME: &str = "imgpin.log";

/// Output format for the console log layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other} (expected pretty or json)")),
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Pretty => f.write_str("pretty"),
            LogFormat::Json => f.write_str("json"),
        }
    }
}

/// Keeps the non-blocking writers alive; dropping it flushes pending log lines.
#[must_use = "dropping the guard immediately discards buffered log output"]
pub struct LoggingGuard {
    _guards: Vec<WorkerGuard>,
}

/// Map the numeric verbosity setting onto a filter directive.
pub fn verbosity_directive(verbosity: u64) -> &'static str {
    match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    }
}

/// Initialize the tracing subscriber once for the process.
///
/// * `IMGPIN_LOG` overrides the filter (e.g. `info`, `imgpin_core=trace`);
///   otherwise the level follows `verbosity`.
/// * Console output goes to stderr so stdout stays free for machine-readable
///   output such as the config dump.
/// * When `directory` is set, a daily rolling JSON log file is written there.
pub fn init_tracing(
    verbosity: u64,
    format: LogFormat,
    directory: Option<&Path>,
) -> std::io::Result<LoggingGuard> {
    let filter = match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive ({}); falling back to verbosity {}",
                LOG_ENV, err, verbosity
            );
            EnvFilter::new(verbosity_directive(verbosity))
        }),
        Err(_) => EnvFilter::new(verbosity_directive(verbosity)),
    };

    let mut guards = Vec::new();
    let (stderr_writer, stderr_guard) = tracing_appender::non_blocking(std::io::stderr());
    guards.push(stderr_guard);

    let console_layer = match format {
        LogFormat::Pretty => subscriber_fmt::layer()
            .with_target(false)
            .with_timer(subscriber_fmt::time::UtcTime::rfc_3339())
            .with_writer(stderr_writer)
            .boxed(),
        LogFormat::Json => subscriber_fmt::layer()
            .with_target(true)
            .with_timer(subscriber_fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stderr_writer)
            .boxed(),
    };

    let file_layer = match directory {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let (file_writer, file_guard) = tracing_appender::non_blocking(daily(dir, LOG_FILE_NAME));
            guards.push(file_guard);
            Some(
                subscriber_fmt::layer()
                    .with_target(true)
                    .with_timer(subscriber_fmt::time::UtcTime::rfc_3339())
                    .json()
                    .with_writer(file_writer)
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .ok();

    debug!(verbosity, format = %format, log_dir = ?directory, "tracing initialised");
    Ok(LoggingGuard { _guards: guards })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbosity_levels_map_to_directives() {
        assert_eq!(verbosity_directive(0), "warn");
        assert_eq!(verbosity_directive(1), "info");
        assert_eq!(verbosity_directive(2), "debug");
        assert_eq!(verbosity_directive(7), "trace");
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!(" pretty ".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn init_with_file_layer_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let guard = init_tracing(2, LogFormat::Json, Some(&logs)).unwrap();
        tracing::info!("logging smoke test");
        drop(guard);
        assert!(logs.is_dir());
    }
}

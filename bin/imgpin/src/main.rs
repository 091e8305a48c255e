//! ---
//! imgpin_section: "07-entrypoints"
//! imgpin_subsection: "binary"
//! imgpin_type: "source"
//! imgpin_scope: "code"
//! imgpin_description: "Binary entrypoint running one update pass over all managed services."
//! imgpin_version: "v0.0.0-prealpha"
//! imgpin_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use imgpin_common::{init_tracing, ErrorKind, Settings};
use imgpin_core::run_update;
use imgpin_tools::SystemRunner;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Resolve compose image tags to digests and update services whose digest moved",
    long_about = "Settings are read from IMGPIN_* environment variables, then from an optional \
                  JSON config file, then from built-in defaults."
)]
struct Cli {
    #[arg(
        long,
        value_name = "FILE",
        env = "IMGPIN_CONFIG_FILE",
        help = "JSON file with setting names as keys"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Print the effective settings as JSON and exit")]
    print_config_json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            eprintln!("imgpin: {err}");
            return ExitCode::from(ErrorKind::Config.exit_code());
        }
    };

    if cli.print_config_json {
        return match print_settings(&settings) {
            Ok(()) => ExitCode::SUCCESS,
            Err(err) => {
                eprintln!("imgpin: {err:#}");
                ExitCode::from(ErrorKind::SystemError.exit_code())
            }
        };
    }

    let _logging = match init_tracing(
        settings.verbosity,
        settings.log_format,
        settings.log_directory.as_deref(),
    ) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("imgpin: could not set up logging: {err}");
            return ExitCode::from(ErrorKind::SystemError.exit_code());
        }
    };
    tracing::debug!(?settings, "effective settings");

    match run_update(&settings, Arc::new(SystemRunner::new())) {
        Ok(report) => {
            let status = report.status();
            if status.is_success() {
                info!(services = report.services.len(), "all services up to date");
            } else {
                error!(status = %status, code = status.exit_code(), "update run finished with errors");
            }
            ExitCode::from(status.exit_code())
        }
        Err(err) => {
            error!(kind = %err.kind, error = %err.message, "cannot proceed");
            ExitCode::from(err.exit_code())
        }
    }
}

fn print_settings(settings: &Settings) -> Result<()> {
    let rendered = serde_json::to_string_pretty(settings).context("serialising settings")?;
    println!("{rendered}");
    Ok(())
}

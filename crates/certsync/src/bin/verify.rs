//! verify-pve-cert - inspect the installed management proxy certificate

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::error;

use pve_certsync::service::SystemctlService;
use pve_certsync::telemetry::{init_tracing, init_tracing_with, LogFormat};
use pve_certsync::{CertSyncConfig, CertSyncError, Verifier, DEFAULT_CONFIG_PATH};

/// Exit code when the report contains failed checks.
const CHECKS_FAILED: u8 = 1;

/// Verify the installed certificate, the service and the served endpoint
#[derive(Parser, Debug)]
#[command(name = "verify-pve-cert")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "PVECERT_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,

    /// Log line format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,

    /// Print the report as JSON
    #[arg(long = "json")]
    json: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    if cli.json {
        init_tracing_with(cli.verbose, cli.log_format, std::io::stderr);
    } else {
        init_tracing(cli.verbose, cli.log_format);
    }

    match run(&cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(CHECKS_FAILED),
        Err(e) => match e.downcast_ref::<CertSyncError>() {
            Some(err) => {
                error!("{}", err.report());
                ExitCode::from(err.exit_code())
            }
            None => {
                error!("{e:#}");
                ExitCode::from(CHECKS_FAILED)
            }
        },
    }
}

async fn run(cli: &Cli) -> Result<bool> {
    let config = CertSyncConfig::from_file(&cli.config).map_err(CertSyncError::from)?;
    let report = Verifier::new(config, SystemctlService::new()).verify().await?;

    if cli.json {
        let json = serde_json::to_string_pretty(&report).context("Failed to encode report")?;
        println!("{json}");
    } else {
        println!("{report}");
    }
    Ok(report.passed)
}

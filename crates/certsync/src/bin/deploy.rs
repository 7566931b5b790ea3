//! deploy-pve-cert - install the current certificate pair from the remote host

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Result};
use chrono::Utc;
use clap::Parser;
use nix::unistd::geteuid;
use tracing::error;

use pve_certsync::remote::ScpRemote;
use pve_certsync::service::SystemctlService;
use pve_certsync::telemetry::{init_tracing, LogFormat};
use pve_certsync::{CertSyncConfig, CertSyncError, DeploymentReport, Deployer, DEFAULT_CONFIG_PATH};

/// Fetch, validate and install the management proxy certificate
#[derive(Parser, Debug)]
#[command(name = "deploy-pve-cert")]
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

    /// Run without root privileges (staging environments)
    #[arg(long = "allow-non-root")]
    allow_non_root: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_format);

    let deployer = match prepare(&cli) {
        Ok(deployer) => deployer,
        Err(e) => {
            return match e.downcast_ref::<CertSyncError>() {
                Some(err) => {
                    error!("{}", err.report());
                    ExitCode::from(err.exit_code())
                }
                None => {
                    error!("{e:#}");
                    ExitCode::FAILURE
                }
            };
        }
    };

    // Deployment failures are already logged through the audit log.
    match deployer.deploy().await {
        Ok(report) => {
            print_summary(&report);
            ExitCode::SUCCESS
        }
        Err(e) => ExitCode::from(e.exit_code()),
    }
}

fn prepare(cli: &Cli) -> Result<Deployer<ScpRemote, SystemctlService>> {
    if !cli.allow_non_root && !geteuid().is_root() {
        bail!("deploy-pve-cert must be run as root (use --allow-non-root to override)");
    }

    let config = CertSyncConfig::from_file(&cli.config).map_err(CertSyncError::from)?;
    let remote = ScpRemote::from_config(&config);
    Ok(Deployer::new(config, remote, SystemctlService::new()))
}

fn print_summary(report: &DeploymentReport) {
    let cert = &report.certificate;
    println!("Certificate deployed");
    println!("  Subject:  {}", cert.subject);
    println!(
        "  Expires:  {} ({} days remaining)",
        cert.not_after,
        cert.days_remaining(Utc::now())
    );
    println!("  Source:   {}", report.source);
    println!("  Access:   {}", report.access_url);
    match &report.snapshot {
        Some(path) => println!("  Backup:   {}", path.display()),
        None => println!("  Backup:   none (no previous certificate)"),
    }
}

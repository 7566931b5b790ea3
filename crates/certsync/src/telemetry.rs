//! Log output setup shared by both binaries.
//!
//! Log lines go to standard output next to the command's own progress
//! output. `verify-pve-cert --json` keeps standard output for the report and
//! logs to standard error instead.

use clap::ValueEnum;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::EnvFilter;

/// Format of emitted log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber, writing to standard output.
///
/// `RUST_LOG` takes precedence; otherwise `info`, or `debug` when verbose.
pub fn init_tracing(verbose: bool, format: LogFormat) {
    init_tracing_with(verbose, format, std::io::stdout);
}

/// Install the global subscriber with an explicit writer.
pub fn init_tracing_with<W>(verbose: bool, format: LogFormat, writer: W)
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let log_level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    if let Err(e) = tracing::subscriber::set_global_default(subscriber(filter, format, writer)) {
        eprintln!("Failed to install log subscriber: {e}");
    }
}

fn subscriber<W>(filter: EnvFilter, format: LogFormat, writer: W) -> Box<dyn Subscriber + Send + Sync>
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer);

    match format {
        LogFormat::Text => Box::new(builder.with_target(false).finish()),
        LogFormat::Json => Box::new(builder.json().finish()),
    }
}

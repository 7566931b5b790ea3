//! External command execution.
//!
//! `ssh`, `scp` and `systemctl` are run without a terminal, with stdin
//! closed and a hard timeout; a timed-out child is killed.

use std::ffi::OsStr;
use std::process::{Output, Stdio};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, trace};

/// Errors raised while running an external command.
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("{program} failed ({status}): {detail}")]
    Failed {
        program: String,
        status: String,
        detail: String,
    },
}

/// Run `program` and return its output, whatever the exit status.
pub async fn run<I, S>(program: &str, args: I, timeout: Duration) -> Result<Output, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let mut command = Command::new(program);
    command.args(args).stdin(Stdio::null()).kill_on_drop(true);
    trace!(command = ?command.as_std(), "Running command");

    let output = tokio::time::timeout(timeout, command.output())
        .await
        .map_err(|_| CommandError::Timeout {
            program: program.to_string(),
            timeout,
        })?
        .map_err(|source| CommandError::Spawn {
            program: program.to_string(),
            source,
        })?;

    debug!(
        program = %program,
        status = %status_summary(&output),
        "Command finished"
    );
    Ok(output)
}

/// Run `program` and fail unless it exits successfully.
pub async fn run_checked<I, S>(
    program: &str,
    args: I,
    timeout: Duration,
) -> Result<Output, CommandError>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run(program, args, timeout).await?;
    if output.status.success() {
        return Ok(output);
    }

    Err(CommandError::Failed {
        program: program.to_string(),
        status: status_summary(&output),
        detail: failure_summary(&output),
    })
}

/// Best available explanation of a failed command.
pub fn failure_summary(output: &Output) -> String {
    let stderr = trim_bytes(&output.stderr);
    if !stderr.is_empty() {
        return stderr;
    }
    let stdout = trim_bytes(&output.stdout);
    if !stdout.is_empty() {
        return stdout;
    }
    "no output".to_string()
}

fn status_summary(output: &Output) -> String {
    match output.status.code() {
        Some(code) => format!("exit code {code}"),
        None => "terminated by signal".to_string(),
    }
}

fn trim_bytes(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).trim().to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_checked_success() {
        let output = run_checked("sh", ["-c", "echo ok"], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(trim_bytes(&output.stdout), "ok");
    }

    #[tokio::test]
    async fn test_run_checked_reports_stderr() {
        let err = run_checked("sh", ["-c", "echo denied >&2; exit 3"], Duration::from_secs(5))
            .await
            .unwrap_err();

        match err {
            CommandError::Failed { status, detail, .. } => {
                assert_eq!(status, "exit code 3");
                assert_eq!(detail, "denied");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_timeout() {
        let err = run("sh", ["-c", "sleep 5"], Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let err = run("definitely-not-a-real-binary", Vec::<String>::new(), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Spawn { .. }));
    }
}

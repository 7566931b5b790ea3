//! Append-only deployment record.
//!
//! Each entry is one line, `[YYYY-MM-DD HH:MM:SS] message`, appended to the
//! configured log file. Line breaks inside a message (multi-line `ssh`
//! stderr, for instance) are folded so an entry never spans lines. Entries
//! are mirrored as tracing events, which the binaries write to standard
//! output.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{error, info, warn};

use crate::error::CertSyncError;

/// Timestamp format of audit entries.
const ENTRY_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Human-readable audit trail of deployment steps.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// Create a log writing to `path`.
    ///
    /// Nothing is created on disk until the first entry is recorded.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Record a successful step.
    pub fn record(&self, message: &str) {
        info!(target: "audit", "{message}");
        self.append_or_warn(message);
    }

    /// Record a non-fatal problem.
    pub fn warn(&self, message: &str) {
        warn!(target: "audit", "{message}");
        self.append_or_warn(&format!("WARNING: {message}"));
    }

    /// Record a fatal error with its step name.
    pub fn failure(&self, err: &CertSyncError) {
        let report = single_line(&err.report());
        error!(target: "audit", step = err.step(), error = %report, "Step failed");
        self.append_or_warn(&format!("ERROR [{}]: {}", err.step(), report));
    }

    /// Read back all entries.
    pub fn entries(&self) -> io::Result<Vec<String>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(content.lines().map(str::to_string).collect()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn append_or_warn(&self, message: &str) {
        if let Err(e) = self.append(message) {
            warn!(
                path = %self.path.display(),
                error = %e,
                "Failed to write audit log entry"
            );
        }
    }

    fn append(&self, message: &str) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let timestamp = Local::now().format(ENTRY_TIME_FORMAT);
        writeln!(file, "[{timestamp}] {}", single_line(message))
    }
}

/// Fold line breaks into ` | ` separators.
fn single_line(message: &str) -> String {
    message
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" | ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cert::CertificateError;
    use crate::process::CommandError;
    use crate::remote::RemoteError;
    use crate::telemetry::LogFormat;
    use tempfile::TempDir;

    #[test]
    fn test_entries_are_appended() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("logs/deploy.log"));

        assert!(log.entries().unwrap().is_empty());
        assert!(!log.path().exists());

        log.record("Starting certificate deployment");
        log.warn("Certificate expires in 12 days");

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries[0].starts_with('['));
        assert!(entries[0].ends_with("] Starting certificate deployment"));
        assert!(entries[1].contains("WARNING: Certificate expires"));
    }

    #[test]
    fn test_failure_entry_names_step() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("deploy.log"));

        log.failure(&CertSyncError::Validation(CertificateError::NoCertificate));

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("ERROR [validation]"));
    }

    #[test]
    fn test_multi_line_error_is_one_entry() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("deploy.log"));

        log.failure(&CertSyncError::Connection {
            target: "certs@nas".into(),
            source: RemoteError::Command(CommandError::Failed {
                program: "ssh".into(),
                status: "exit code 255".into(),
                detail: "Warning: Identity file /nonexistent not accessible\r\n\
                         ssh: connect to host 127.0.0.1 port 1: Connection refused"
                    .into(),
            }),
        });

        let entries = log.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].starts_with('['));
        assert!(entries[0].contains("not accessible | ssh: connect to host"));
    }

    #[test]
    fn test_entries_reach_log_output() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("deploy.log"));
        let (subscriber, output) = crate::telemetry::tests::capturing(LogFormat::Text);

        tracing::subscriber::with_default(subscriber, || {
            log.record("Installed certificate");
            log.warn("Certificate expires in 12 days");
        });

        let output = output.contents();
        assert!(output.contains("Installed certificate"));
        assert!(output.contains("Certificate expires in 12 days"));
    }

    #[test]
    fn test_failure_is_logged_once() {
        let dir = TempDir::new().unwrap();
        let log = AuditLog::new(dir.path().join("deploy.log"));
        let (subscriber, output) = crate::telemetry::tests::capturing(LogFormat::Text);

        tracing::subscriber::with_default(subscriber, || {
            log.failure(&CertSyncError::Validation(CertificateError::KeyMismatch));
        });

        let output = output.contents();
        assert_eq!(output.lines().count(), 1);
        assert_eq!(output.matches("validation failed").count(), 1);
    }

    #[test]
    fn test_reopening_keeps_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("deploy.log");

        AuditLog::new(&path).record("first run");
        AuditLog::new(&path).record("second run");

        assert_eq!(AuditLog::new(&path).entries().unwrap().len(), 2);
    }
}

//! Error types for certificate deployment and verification.
//!
//! Each workflow step owns a module-level error type; [`CertSyncError`]
//! tags those with the step that failed. Every variant is terminal for the
//! current invocation.

use std::path::PathBuf;

use thiserror::Error;

use crate::backup::BackupError;
use crate::cert::CertificateError;
use crate::config::ConfigError;
use crate::install::InstallError;
use crate::remote::RemoteError;
use crate::service::ServiceError;

/// Result type for deployment and verification operations.
pub type CertSyncResult<T> = Result<T, CertSyncError>;

/// Errors that abort a deployment or verification run.
#[derive(Debug, Error)]
pub enum CertSyncError {
    /// Configuration could not be loaded or is invalid.
    #[error("configuration error")]
    Config(#[from] ConfigError),

    /// Remote host is unreachable over the copy channel.
    #[error("connection to {target} failed")]
    Connection {
        target: String,
        #[source]
        source: RemoteError,
    },

    /// Snapshot of the live pair could not be taken.
    #[error("backup failed")]
    Backup(#[source] BackupError),

    /// Certificate material could not be fetched into staging.
    #[error("fetch of {remote_path} failed")]
    Fetch {
        remote_path: String,
        #[source]
        source: RemoteError,
    },

    /// Staged material failed validation and was not installed.
    #[error("validation failed")]
    Validation(#[source] CertificateError),

    /// Live pair could not be installed.
    #[error("install failed ({rollback})")]
    Install {
        rollback: RollbackOutcome,
        #[source]
        source: InstallError,
    },

    /// Consuming service did not restart cleanly.
    #[error("restart of service '{service}' failed")]
    ServiceRestart {
        service: String,
        #[source]
        source: ServiceError,
    },

    /// Installed certificate could not be read or parsed.
    #[error("cannot read certificate {path:?}: {reason}")]
    FileRead { path: PathBuf, reason: String },
}

/// What happened to the live pair after a failed install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RollbackOutcome {
    /// Previous pair restored from the given snapshot.
    Restored(PathBuf),
    /// No previous pair existed; partially installed files were removed.
    Cleared,
    /// Rollback itself failed; live pair may be inconsistent.
    Failed(String),
}

impl std::fmt::Display for RollbackOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Restored(path) => write!(f, "previous pair restored from {}", path.display()),
            Self::Cleared => write!(f, "partial install removed"),
            Self::Failed(reason) => write!(f, "ROLLBACK FAILED, live pair may be inconsistent: {reason}"),
        }
    }
}

impl CertSyncError {
    /// Name of the workflow step that failed.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Connection { .. } => "connection",
            Self::Backup(_) => "backup",
            Self::Fetch { .. } => "fetch",
            Self::Validation(_) => "validation",
            Self::Install { .. } => "install",
            Self::ServiceRestart { .. } => "service-restart",
            Self::FileRead { .. } => "file-read",
        }
    }

    /// This error and its causes on one line, each cause once.
    ///
    /// Lower-level errors often repeat their own source in their message;
    /// a cause already contained in the text so far is skipped.
    pub fn report(&self) -> String {
        let mut message = self.to_string();
        let mut cause = std::error::Error::source(self);
        while let Some(err) = cause {
            let text = err.to_string();
            if !message.contains(&text) {
                message.push_str(": ");
                message.push_str(&text);
            }
            cause = err.source();
        }
        message
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::Connection { .. } => 3,
            Self::Backup(_) => 4,
            Self::Fetch { .. } => 5,
            Self::Validation(_) => 6,
            Self::Install { .. } => 7,
            Self::ServiceRestart { .. } => 8,
            Self::FileRead { .. } => 9,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandError;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            CertSyncError::Config(ConfigError::NotFound(PathBuf::from("/x"))),
            CertSyncError::Connection {
                target: "h".into(),
                source: RemoteError::Unreachable("h".into()),
            },
            CertSyncError::Validation(CertificateError::NoCertificate),
            CertSyncError::FileRead {
                path: PathBuf::from("/x"),
                reason: "gone".into(),
            },
        ];

        let mut codes: Vec<u8> = errors.iter().map(CertSyncError::exit_code).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(codes.iter().all(|c| *c > 1));
    }

    #[test]
    fn test_report_lists_each_cause_once() {
        let err = CertSyncError::Connection {
            target: "certs@nas".into(),
            source: RemoteError::Command(CommandError::Failed {
                program: "ssh".into(),
                status: "exit code 255".into(),
                detail: "Connection refused".into(),
            }),
        };

        let report = err.report();
        assert!(report.starts_with("connection to certs@nas failed: ssh failed"));
        assert_eq!(report.matches("Connection refused").count(), 1);
    }

    #[test]
    fn test_report_skips_repeated_io_error() {
        let err = CertSyncError::Install {
            rollback: RollbackOutcome::Cleared,
            source: InstallError::Io(std::io::Error::other("disk full")),
        };

        assert_eq!(
            err.report(),
            "install failed (partial install removed): IO error: disk full"
        );
    }

    #[test]
    fn test_install_error_mentions_rollback() {
        let err = CertSyncError::Install {
            rollback: RollbackOutcome::Failed("disk full".into()),
            source: InstallError::Io(std::io::Error::other("boom")),
        };
        let msg = err.to_string();
        assert!(msg.contains("ROLLBACK FAILED"));
        assert_eq!(err.step(), "install");
    }
}

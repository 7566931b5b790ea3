//! Certificate deployment pipeline
//!
//! Pulls a key/chain pair from the remote host and installs it as the live
//! pair of the management service. Stages run strictly in order and any
//! failure stops the run:
//!
//! 1. connection check
//! 2. snapshot of the current live pair
//! 3. fetch into a private staging directory
//! 4. validation of the staged pair
//! 5. install (rolled back from the snapshot on failure)
//! 6. service restart
//! 7. post-check of the installed chain
//!
//! Nothing writes the live paths before validation has passed.

use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tempfile::TempDir;
use tracing::{debug, error, info, warn};

use crate::audit::AuditLog;
use crate::backup::{BackupStore, Snapshot};
use crate::cert::{validate_pair, CertificateInfo, KeyCheck, ValidatedPair};
use crate::config::CertSyncConfig;
use crate::error::{CertSyncError, CertSyncResult, RollbackOutcome};
use crate::install::{FilePolicy, Installer, LivePaths};
use crate::remote::{RemoteCopy, RemoteError};
use crate::service::{ServiceControl, ServiceError};

/// Outcome of a successful deployment.
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    /// Snapshot of the previous live pair, if one existed
    pub snapshot: Option<PathBuf>,
    /// Summary of the installed chain as re-read from disk
    pub certificate: CertificateInfo,
    /// `user@host:dir` the material came from
    pub source: String,
    pub access_url: String,
    pub key_check: KeyCheck,
}

/// Key and chain fetched into staging.
struct Staged {
    _dir: TempDir,
    chain: Vec<u8>,
    key: Vec<u8>,
}

/// Runs the deployment pipeline against injected remote and service
/// capabilities.
pub struct Deployer<R, S> {
    config: CertSyncConfig,
    remote: R,
    service: S,
    audit: AuditLog,
    backups: BackupStore,
    installer: Installer,
}

impl<R: RemoteCopy, S: ServiceControl> Deployer<R, S> {
    pub fn new(config: CertSyncConfig, remote: R, service: S) -> Self {
        let audit = AuditLog::new(&config.log_file);
        let backups = BackupStore::new(&config.backup_dir);
        let installer = Installer::new(
            LivePaths::from_config(&config),
            FilePolicy::from_config(&config),
        );
        Self {
            config,
            remote,
            service,
            audit,
            backups,
            installer,
        }
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    /// Run every stage; the failing stage is recorded in the audit log.
    pub async fn deploy(&self) -> CertSyncResult<DeploymentReport> {
        let result = self.run().await;
        if let Err(e) = &result {
            self.audit.failure(e);
        }
        result
    }

    async fn run(&self) -> CertSyncResult<DeploymentReport> {
        self.check_connection().await?;
        self.audit.record(&format!(
            "Starting certificate deployment from {}",
            self.config.source_description()
        ));

        let snapshot = self.backup()?;
        let staged = self.fetch().await?;
        let validated = self.validate(&staged)?;
        self.install(&staged, snapshot.as_ref())?;
        self.restart().await?;
        let certificate = self.post_check()?;

        Ok(DeploymentReport {
            snapshot: snapshot.map(|s| s.path),
            certificate,
            source: self.config.source_description(),
            access_url: self.config.access_url(),
            key_check: validated.key_check,
        })
    }

    async fn check_connection(&self) -> CertSyncResult<()> {
        debug!(remote = %self.remote.describe(), "Testing remote connection");
        self.remote
            .test_connection()
            .await
            .map_err(|source| CertSyncError::Connection {
                target: self.remote.describe(),
                source,
            })
    }

    fn backup(&self) -> CertSyncResult<Option<Snapshot>> {
        let snapshot = self
            .backups
            .snapshot(self.installer.paths())
            .map_err(CertSyncError::Backup)?;

        match &snapshot {
            Some(snapshot) => {
                if !snapshot.is_complete() {
                    self.audit
                        .warn("Only part of the live pair existed; backed up what was present");
                }
                self.audit.record(&format!(
                    "Backed up current certificates to {}",
                    snapshot.path.display()
                ));
            }
            None => self.audit.record("No live certificates to back up"),
        }
        Ok(snapshot)
    }

    async fn fetch(&self) -> CertSyncResult<Staged> {
        let dir = self.staging_dir().map_err(|e| CertSyncError::Fetch {
            remote_path: self.config.source_description(),
            source: RemoteError::Io(e),
        })?;

        let chain = self
            .fetch_one(&self.config.remote_chain_path(), dir.path())
            .await?;
        let key = self
            .fetch_one(&self.config.remote_key_path(), dir.path())
            .await?;

        self.audit.record(&format!(
            "Fetched certificates from {}",
            self.config.source_description()
        ));
        Ok(Staged {
            _dir: dir,
            chain,
            key,
        })
    }

    /// Fetch one remote file, stage it, and read the staged copy back.
    async fn fetch_one(&self, remote_path: &str, staging: &Path) -> CertSyncResult<Vec<u8>> {
        let fetch_error = |source| CertSyncError::Fetch {
            remote_path: remote_path.to_string(),
            source,
        };

        let contents = self.remote.fetch(remote_path).await.map_err(fetch_error)?;
        let file_name = Path::new(remote_path)
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "staged".into());
        let staged = staging.join(file_name);

        write_private(&staged, &contents).map_err(|e| fetch_error(RemoteError::Io(e)))?;
        debug!(remote = remote_path, staged = %staged.display(), bytes = contents.len(), "Staged file");
        fs::read(&staged).map_err(|e| fetch_error(RemoteError::Io(e)))
    }

    fn staging_dir(&self) -> io::Result<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("pvecert-staging-");
        match &self.config.staging_dir {
            Some(parent) => {
                fs::create_dir_all(parent)?;
                builder.tempdir_in(parent)
            }
            None => builder.tempdir(),
        }
    }

    fn validate(&self, staged: &Staged) -> CertSyncResult<ValidatedPair> {
        let now = Utc::now();
        let validated = validate_pair(&staged.chain, &staged.key, &self.config.domain, now)
            .map_err(CertSyncError::Validation)?;

        let info = &validated.info;
        let days = info.days_remaining(now);
        info!(
            subject = %info.subject,
            not_after = %info.not_after,
            days_remaining = days,
            fingerprint = %info.fingerprint_sha256,
            "Staged certificate passed validation"
        );

        if days < self.config.expiry_warning_days {
            self.audit
                .warn(&format!("Certificate expires in {days} days ({})", info.not_after));
        }
        if let KeyCheck::Unverified(reason) = &validated.key_check {
            self.audit.warn(&format!(
                "Could not confirm that the private key matches the certificate: {reason}"
            ));
        }

        self.audit.record(&format!(
            "Validated certificate for {} (expires {})",
            self.config.domain, info.not_after
        ));
        Ok(validated)
    }

    fn install(&self, staged: &Staged, snapshot: Option<&Snapshot>) -> CertSyncResult<()> {
        if let Err(source) = self.installer.install(&staged.key, &staged.chain) {
            error!(error = %source, "Install failed, rolling back live certificate pair");
            let rollback = self.roll_back(snapshot);
            return Err(CertSyncError::Install { rollback, source });
        }

        self.audit.record(&format!(
            "Installed certificate to {} and key to {}",
            self.installer.paths().cert.display(),
            self.installer.paths().key.display()
        ));
        Ok(())
    }

    fn roll_back(&self, snapshot: Option<&Snapshot>) -> RollbackOutcome {
        let result = match snapshot {
            Some(snapshot) => self
                .installer
                .restore(snapshot)
                .map(|()| RollbackOutcome::Restored(snapshot.path.clone())),
            None => self.installer.clear().map(|()| RollbackOutcome::Cleared),
        };

        match result {
            Ok(outcome) => {
                self.audit.record(&format!("Rollback: {outcome}"));
                outcome
            }
            Err(e) => {
                error!(error = %e, "Rollback failed");
                RollbackOutcome::Failed(e.to_string())
            }
        }
    }

    async fn restart(&self) -> CertSyncResult<()> {
        let name = &self.config.service_name;
        let restart_error = |source| CertSyncError::ServiceRestart {
            service: name.clone(),
            source,
        };

        self.service.restart(name).await.map_err(restart_error)?;
        if !self.service.is_active(name).await.map_err(restart_error)? {
            return Err(restart_error(ServiceError::NotActive(name.clone())));
        }

        self.audit.record(&format!("Restarted {name}"));
        Ok(())
    }

    fn post_check(&self) -> CertSyncResult<CertificateInfo> {
        let path = &self.installer.paths().cert;
        let read_error = |reason: String| CertSyncError::FileRead {
            path: path.clone(),
            reason,
        };

        let chain = fs::read(path).map_err(|e| read_error(e.to_string()))?;
        let info = CertificateInfo::from_pem(&chain).map_err(|e| read_error(e.to_string()))?;

        let days = info.days_remaining(Utc::now());
        if days < self.config.expiry_warning_days {
            warn!(days_remaining = days, "Installed certificate expires soon");
        }
        self.audit.record(&format!(
            "Deployment complete: subject {}, expires {} ({days} days remaining), source {}, access {}",
            info.subject,
            info.not_after,
            self.config.source_description(),
            self.config.access_url()
        ));
        Ok(info)
    }
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

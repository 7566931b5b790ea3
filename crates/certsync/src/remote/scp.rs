//! SSH/SCP-backed remote copy channel.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{RemoteCopy, RemoteError};
use crate::config::CertSyncConfig;
use crate::process;

/// Extra time granted on top of the SSH connect timeout for a whole command.
const COMMAND_GRACE: Duration = Duration::from_secs(30);

/// Remote copy channel using the system `ssh` and `scp` binaries.
///
/// Authentication is key-based only; `BatchMode=yes` makes the tools fail
/// instead of prompting for a password or host-key confirmation.
#[derive(Debug, Clone)]
pub struct ScpRemote {
    host: String,
    user: String,
    port: u16,
    identity: PathBuf,
    connect_timeout: Duration,
    legacy_protocol: bool,
}

impl ScpRemote {
    pub fn new(host: impl Into<String>, user: impl Into<String>, identity: impl Into<PathBuf>) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            port: 22,
            identity: identity.into(),
            connect_timeout: Duration::from_secs(10),
            legacy_protocol: true,
        }
    }

    pub fn from_config(config: &CertSyncConfig) -> Self {
        Self::new(&config.remote_host, &config.remote_user, &config.ssh_key)
            .with_port(config.remote_port)
            .with_connect_timeout(config.connect_timeout())
            .with_legacy_protocol(config.legacy_scp)
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use the legacy SCP protocol (`scp -O`) instead of SFTP.
    pub fn with_legacy_protocol(mut self, legacy: bool) -> Self {
        self.legacy_protocol = legacy;
        self
    }

    fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }

    fn command_timeout(&self) -> Duration {
        self.connect_timeout + COMMAND_GRACE
    }

    fn common_options(&self) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.identity.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)),
        ]
    }

    fn ssh_args(&self) -> Vec<String> {
        let mut args = self.common_options();
        args.extend(["-p".to_string(), self.port.to_string()]);
        args.extend([self.destination(), "true".to_string()]);
        args
    }

    fn scp_args(&self, remote_path: &str, local_path: &str) -> Vec<String> {
        let mut args = Vec::new();
        if self.legacy_protocol {
            args.push("-O".to_string());
        }
        args.extend(self.common_options());
        args.extend(["-P".to_string(), self.port.to_string()]);
        args.push(format!("{}:{}", self.destination(), remote_path));
        args.push(local_path.to_string());
        args
    }
}

#[async_trait]
impl RemoteCopy for ScpRemote {
    async fn test_connection(&self) -> Result<(), RemoteError> {
        debug!(remote = %self.destination(), port = self.port, "Testing SSH connection");
        process::run_checked("ssh", self.ssh_args(), self.command_timeout()).await?;
        info!(remote = %self.destination(), "SSH connection verified");
        Ok(())
    }

    async fn fetch(&self, remote_path: &str) -> Result<Vec<u8>, RemoteError> {
        let download_dir = tempfile::Builder::new()
            .prefix("pvecert-download")
            .tempdir()?;
        let local_path = download_dir.path().join("payload");

        debug!(
            remote_path = %remote_path,
            local_path = %local_path.display(),
            "Copying remote file"
        );
        process::run_checked(
            "scp",
            self.scp_args(remote_path, &local_path.display().to_string()),
            self.command_timeout(),
        )
        .await?;

        let contents = tokio::fs::read(&local_path).await?;
        debug!(remote_path = %remote_path, bytes = contents.len(), "Remote file copied");
        Ok(contents)
    }

    fn describe(&self) -> String {
        self.destination()
    }
}

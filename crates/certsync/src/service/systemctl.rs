//! systemd-backed service control.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};

use super::{ServiceControl, ServiceError};
use crate::process;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(90);

/// Controls services through `systemctl`.
#[derive(Debug, Clone)]
pub struct SystemctlService {
    timeout: Duration,
}

impl SystemctlService {
    pub fn new() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl Default for SystemctlService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceControl for SystemctlService {
    async fn restart(&self, name: &str) -> Result<(), ServiceError> {
        debug!(service = %name, "Restarting service");
        process::run_checked("systemctl", ["restart", name], self.timeout).await?;
        info!(service = %name, "Service restart issued");
        Ok(())
    }

    async fn is_active(&self, name: &str) -> Result<bool, ServiceError> {
        // Non-zero exit means inactive, failed or unknown; only spawn
        // failures and timeouts are errors.
        let output = process::run("systemctl", ["is-active", "--quiet", name], self.timeout).await?;
        let active = output.status.success();
        debug!(service = %name, active, "Queried service state");
        Ok(active)
    }
}

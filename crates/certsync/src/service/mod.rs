//! Service control for the consuming HTTPS service.

mod memory;
mod systemctl;

pub use memory::MemoryService;
pub use systemctl::SystemctlService;

use async_trait::async_trait;
use thiserror::Error;

use crate::process::CommandError;

/// Errors raised while controlling a service.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("service '{0}' is not active after restart")]
    NotActive(String),

    #[error("service '{0}' rejected the restart request")]
    Rejected(String),
}

/// Restart and status queries for a named service.
///
/// `restart` returns once the restart has been issued, not necessarily
/// once the service is healthy again.
#[async_trait]
pub trait ServiceControl: Send + Sync {
    async fn restart(&self, name: &str) -> Result<(), ServiceError>;

    async fn is_active(&self, name: &str) -> Result<bool, ServiceError>;
}

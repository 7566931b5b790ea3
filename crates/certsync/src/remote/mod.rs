//! Remote copy channel.
//!
//! The deployer only needs two things from the certificate host: proof that
//! it is reachable, and the bytes of a file at a given path. [`ScpRemote`]
//! drives the system `ssh`/`scp` binaries non-interactively;
//! [`MemoryRemote`] serves files from memory.

mod memory;
mod scp;

pub use memory::MemoryRemote;
pub use scp::ScpRemote;

use async_trait::async_trait;
use thiserror::Error;

use crate::process::CommandError;

/// Errors raised by a remote copy channel.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("remote file not found: {0}")]
    NotFound(String),

    #[error("host unreachable: {0}")]
    Unreachable(String),

    #[error("local I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Non-interactive access to files on the certificate host.
#[async_trait]
pub trait RemoteCopy: Send + Sync {
    /// Confirm the host accepts our credential.
    async fn test_connection(&self) -> Result<(), RemoteError>;

    /// Read the file at `remote_path`.
    async fn fetch(&self, remote_path: &str) -> Result<Vec<u8>, RemoteError>;

    /// Short description for logs, e.g. `user@host`.
    fn describe(&self) -> String;
}

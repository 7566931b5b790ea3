//! PVE Certificate Sync Library
//!
//! Deploys TLS certificates issued elsewhere to the Proxmox VE management
//! proxy, and verifies what ends up installed and served.
//!
//! - **Deployment**: fetch over SSH, snapshot, validate, atomic install with
//!   rollback, service restart
//! - **Verification**: validity, domain coverage, key pairing, service state,
//!   live endpoint comparison
//! - **Audit**: timestamped append-only record of every deployment step
//!
//! # Example
//!
//! ```ignore
//! use pve_certsync::{CertSyncConfig, Deployer, ScpRemote, SystemctlService};
//!
//! let config = CertSyncConfig::from_file(Path::new("/root/deploy-certs/deploy-pve-cert.conf"))?;
//! let remote = ScpRemote::from_config(&config);
//! let report = Deployer::new(config, remote, SystemctlService::new()).deploy().await?;
//! ```

// ============================================================================
// Module Declarations
// ============================================================================

pub mod audit;
pub mod backup;
pub mod cert;
pub mod config;
pub mod deploy;
pub mod error;
pub mod install;
pub mod probe;
pub mod process;
pub mod remote;
pub mod service;
pub mod telemetry;
pub mod verify;

#[cfg(test)]
mod test_support;

// ============================================================================
// Public API Re-exports
// ============================================================================

// Configuration
pub use config::{CertSyncConfig, ConfigError, DEFAULT_CONFIG_PATH};

// Errors
pub use error::{CertSyncError, CertSyncResult, RollbackOutcome};

// Deployment
pub use deploy::{DeploymentReport, Deployer};

// Verification
pub use verify::{Check, Outcome, Verifier, VerifyReport};

// Capabilities
pub use remote::{MemoryRemote, RemoteCopy, ScpRemote};
pub use service::{MemoryService, ServiceControl, SystemctlService};

// Certificates
pub use cert::{CertificateInfo, KeyCheck};

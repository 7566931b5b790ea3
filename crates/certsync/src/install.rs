//! Live certificate installation
//!
//! Places a validated key/chain pair at the live paths read by the
//! management service. Each file is written to a temporary file in the
//! destination directory, given its final mode and ownership, synced, and
//! only then renamed over the live path, so the service never observes a
//! half-written file. Both temporaries are fully prepared before either
//! rename happens.

use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Group, Uid, User};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::backup::{BackupError, Snapshot};
use crate::config::CertSyncConfig;

/// Errors that can occur during installation
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("unknown user '{0}'")]
    UnknownUser(String),

    #[error("unknown group '{0}'")]
    UnknownGroup(String),

    #[error("cannot write temporary file next to {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot set mode {mode:o} on {path:?}: {source}")]
    Permissions {
        path: PathBuf,
        mode: u32,
        #[source]
        source: io::Error,
    },

    #[error("cannot change ownership of {path:?}: {source}")]
    Ownership {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("cannot move new file into {path:?}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("partial install: {installed:?} was replaced but {failed:?} was not: {source}")]
    Partial {
        installed: PathBuf,
        failed: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot read snapshot: {0}")]
    Snapshot(#[from] BackupError),
}

/// Which half of the certificate pair a file holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileRole {
    Key,
    Chain,
}

impl FileRole {
    /// File name used by the management service for this role.
    pub fn default_file_name(self) -> &'static str {
        match self {
            Self::Key => "pveproxy-ssl.key",
            Self::Chain => "pveproxy-ssl.pem",
        }
    }
}

impl fmt::Display for FileRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Key => write!(f, "private key"),
            Self::Chain => write!(f, "full chain"),
        }
    }
}

/// Live key and chain paths.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LivePaths {
    pub cert: PathBuf,
    pub key: PathBuf,
}

impl LivePaths {
    pub fn new(cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            cert: cert.into(),
            key: key.into(),
        }
    }

    pub fn from_config(config: &CertSyncConfig) -> Self {
        Self::new(&config.cert_path, &config.key_path)
    }

    pub fn path(&self, role: FileRole) -> &Path {
        match role {
            FileRole::Key => &self.key,
            FileRole::Chain => &self.cert,
        }
    }

    /// Both paths, key first.
    pub fn files(&self) -> [(FileRole, &Path); 2] {
        [(FileRole::Key, &self.key), (FileRole::Chain, &self.cert)]
    }

    /// Whether a complete live pair exists.
    pub fn exists(&self) -> bool {
        self.cert.exists() && self.key.exists()
    }
}

/// Ownership and modes required by the consuming service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePolicy {
    /// `None` leaves the owner unchanged
    pub owner: Option<String>,
    /// `None` leaves the group unchanged
    pub group: Option<String>,
    pub key_mode: u32,
    pub cert_mode: u32,
}

impl FilePolicy {
    pub fn from_config(config: &CertSyncConfig) -> Self {
        Self {
            owner: config.owner.clone(),
            group: config.group.clone(),
            key_mode: config.key_mode,
            cert_mode: config.cert_mode,
        }
    }

    pub fn mode(&self, role: FileRole) -> u32 {
        match role {
            FileRole::Key => self.key_mode,
            FileRole::Chain => self.cert_mode,
        }
    }

    fn resolve_ids(&self) -> Result<(Option<Uid>, Option<Gid>), InstallError> {
        let uid = match &self.owner {
            Some(name) => Some(
                User::from_name(name)
                    .ok()
                    .flatten()
                    .ok_or_else(|| InstallError::UnknownUser(name.clone()))?
                    .uid,
            ),
            None => None,
        };
        let gid = match &self.group {
            Some(name) => Some(
                Group::from_name(name)
                    .ok()
                    .flatten()
                    .ok_or_else(|| InstallError::UnknownGroup(name.clone()))?
                    .gid,
            ),
            None => None,
        };
        Ok((uid, gid))
    }
}

/// Writes certificate material to the live paths.
#[derive(Debug, Clone)]
pub struct Installer {
    paths: LivePaths,
    policy: FilePolicy,
}

impl Installer {
    pub fn new(paths: LivePaths, policy: FilePolicy) -> Self {
        Self { paths, policy }
    }

    pub fn paths(&self) -> &LivePaths {
        &self.paths
    }

    /// Replace the live pair with `key` and `chain`.
    ///
    /// Key is renamed into place first, then the chain. A failure between
    /// the two renames is reported as [`InstallError::Partial`].
    pub fn install(&self, key: &[u8], chain: &[u8]) -> Result<(), InstallError> {
        let ids = self.policy.resolve_ids()?;

        let key_tmp = self.prepare(FileRole::Key, key, ids)?;
        let chain_tmp = self.prepare(FileRole::Chain, chain, ids)?;

        persist(key_tmp, &self.paths.key)?;
        if let Err(e) = persist(chain_tmp, &self.paths.cert) {
            let source = match e {
                InstallError::Persist { source, .. } => source,
                other => io::Error::other(other.to_string()),
            };
            return Err(InstallError::Partial {
                installed: self.paths.key.clone(),
                failed: self.paths.cert.clone(),
                source,
            });
        }

        info!(
            key = %self.paths.key.display(),
            cert = %self.paths.cert.display(),
            "Installed certificate pair"
        );
        Ok(())
    }

    /// Put the live pair back to the state captured in `snapshot`.
    ///
    /// Files absent from the snapshot did not exist before the deployment
    /// and are removed.
    pub fn restore(&self, snapshot: &Snapshot) -> Result<(), InstallError> {
        // Content comes first; ownership is best effort here.
        let ids = self.policy.resolve_ids().unwrap_or_else(|e| {
            warn!(error = %e, "Restoring without changing ownership");
            (None, None)
        });

        let mut prepared = Vec::with_capacity(2);
        for (role, path) in self.paths.files() {
            match snapshot.read(role)? {
                Some(contents) => {
                    prepared.push((self.prepare(role, &contents, ids)?, path.to_path_buf()))
                }
                None => remove_if_present(path)?,
            }
        }
        for (tmp, path) in prepared {
            persist(tmp, &path)?;
        }

        warn!(snapshot = %snapshot.path.display(), "Restored live pair from snapshot");
        Ok(())
    }

    /// Remove both live files.
    pub fn clear(&self) -> Result<(), InstallError> {
        for (_, path) in self.paths.files() {
            remove_if_present(path)?;
        }
        warn!("Removed partially installed certificate pair");
        Ok(())
    }

    fn prepare(
        &self,
        role: FileRole,
        contents: &[u8],
        (uid, gid): (Option<Uid>, Option<Gid>),
    ) -> Result<NamedTempFile, InstallError> {
        let target = self.paths.path(role);
        let dir = match target.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let write_error = |source| InstallError::Write {
            path: target.to_path_buf(),
            source,
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".pvecert-")
            .tempfile_in(dir)
            .map_err(write_error)?;
        tmp.write_all(contents).map_err(write_error)?;
        tmp.as_file().sync_all().map_err(write_error)?;

        if uid.is_some() || gid.is_some() {
            nix::unistd::chown(tmp.path(), uid, gid).map_err(|source| InstallError::Ownership {
                path: target.to_path_buf(),
                source,
            })?;
        }

        let mode = self.policy.mode(role);
        set_mode(tmp.path(), mode).map_err(|source| InstallError::Permissions {
            path: target.to_path_buf(),
            mode,
            source,
        })?;

        debug!(role = %role, tmp = %tmp.path().display(), mode = format!("{mode:o}"), "Prepared file");
        Ok(tmp)
    }
}

fn persist(tmp: NamedTempFile, path: &Path) -> Result<(), InstallError> {
    tmp.persist(path)
        .map(|_| ())
        .map_err(|e| InstallError::Persist {
            path: path.to_path_buf(),
            source: e.error,
        })
}

fn remove_if_present(path: &Path) -> Result<(), InstallError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn set_mode(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

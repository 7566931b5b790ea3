//! Snapshots of the live certificate pair
//!
//! Every deployment copies the current live files into a fresh timestamped
//! directory before anything is overwritten. Snapshots are append-only: they
//! are never modified or pruned here.
//!
//! # Directory Structure
//!
//! ```text
//! backup_dir/
//! ├── 20261016_031500/
//! │   ├── pveproxy-ssl.pem   # Previous full chain
//! │   ├── pveproxy-ssl.key   # Previous private key
//! │   └── snapshot.json      # Original paths and SHA-256 of each file
//! └── 20261016_031500-1/     # Second snapshot within the same second
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cert::fingerprint;
use crate::install::{FileRole, LivePaths};

/// Manifest file name inside each snapshot.
pub const MANIFEST_FILE: &str = "snapshot.json";

const SNAPSHOT_NAME_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Errors raised while taking or reading snapshots.
#[derive(Debug, Error)]
pub enum BackupError {
    #[error("cannot create backup directory {path:?}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot copy {from:?} to {to:?}: {source}")]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("snapshot manifest error: {0}")]
    Manifest(#[from] serde_json::Error),

    #[error("snapshot {0:?} has no manifest")]
    MissingManifest(PathBuf),

    #[error("snapshot file {0:?} does not match its recorded checksum")]
    Corrupt(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// One file captured in a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub role: FileRole,
    /// File name inside the snapshot directory
    pub file_name: String,
    /// Live path the file was copied from
    pub original_path: PathBuf,
    /// SHA-256 of the contents, lowercase hex
    pub sha256: String,
}

/// Contents of `snapshot.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub created: DateTime<Utc>,
    pub files: Vec<SnapshotEntry>,
}

/// A snapshot directory and its manifest.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub path: PathBuf,
    pub manifest: SnapshotManifest,
}

impl Snapshot {
    /// Entry for `role`, if that file was live when the snapshot was taken.
    pub fn entry(&self, role: FileRole) -> Option<&SnapshotEntry> {
        self.manifest.files.iter().find(|entry| entry.role == role)
    }

    /// Contents captured for `role`, checked against the manifest.
    pub fn read(&self, role: FileRole) -> Result<Option<Vec<u8>>, BackupError> {
        let Some(entry) = self.entry(role) else {
            return Ok(None);
        };

        let path = self.path.join(&entry.file_name);
        let contents = fs::read(&path)?;
        if fingerprint(&contents) != entry.sha256 {
            return Err(BackupError::Corrupt(path));
        }
        Ok(Some(contents))
    }

    /// Whether both halves of the pair were captured.
    pub fn is_complete(&self) -> bool {
        self.entry(FileRole::Key).is_some() && self.entry(FileRole::Chain).is_some()
    }
}

/// Snapshot storage under a backup root.
#[derive(Debug, Clone)]
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    /// Create a store rooted at `root`; nothing is created until a snapshot
    /// is taken.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Copy whichever live files exist into a new snapshot.
    ///
    /// Returns `None` when no live file exists.
    pub fn snapshot(&self, live: &LivePaths) -> Result<Option<Snapshot>, BackupError> {
        let present: Vec<(FileRole, &Path)> = live
            .files()
            .into_iter()
            .filter(|(_, path)| path.exists())
            .collect();

        if present.is_empty() {
            debug!("No live certificate files to back up");
            return Ok(None);
        }
        if present.len() == 1 {
            warn!(
                role = %present[0].0,
                "Only one half of the live pair exists; backing up what is present"
            );
        }

        self.ensure_root()?;
        let snapshot_dir = self.claim_snapshot_dir()?;

        let mut files = Vec::with_capacity(present.len());
        for (role, source) in present {
            // Named by role: live key and chain may share a base name.
            let file_name = role.default_file_name().to_string();
            let target = snapshot_dir.join(&file_name);

            // Read and write explicitly: /etc/pve is a FUSE filesystem that
            // does not support every copy primitive.
            let contents = fs::read(source).map_err(|e| copy_error(source, &target, e))?;
            fs::write(&target, &contents).map_err(|e| copy_error(source, &target, e))?;
            restrict(&target, 0o600).map_err(|e| copy_error(source, &target, e))?;

            files.push(SnapshotEntry {
                role,
                file_name,
                original_path: source.to_path_buf(),
                sha256: fingerprint(&contents),
            });
        }

        let manifest = SnapshotManifest {
            created: Utc::now(),
            files,
        };
        let manifest_path = snapshot_dir.join(MANIFEST_FILE);
        fs::write(&manifest_path, serde_json::to_string_pretty(&manifest)?)?;
        restrict(&manifest_path, 0o600)?;

        info!(
            snapshot = %snapshot_dir.display(),
            files = manifest.files.len(),
            "Backed up live certificate pair"
        );

        Ok(Some(Snapshot {
            path: snapshot_dir,
            manifest,
        }))
    }

    /// Load a snapshot from its directory.
    pub fn load(&self, path: &Path) -> Result<Snapshot, BackupError> {
        let manifest_path = path.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Err(BackupError::MissingManifest(path.to_path_buf()));
        }
        let manifest: SnapshotManifest = serde_json::from_str(&fs::read_to_string(manifest_path)?)?;
        Ok(Snapshot {
            path: path.to_path_buf(),
            manifest,
        })
    }

    /// Snapshot directories, oldest first.
    pub fn list(&self) -> Result<Vec<PathBuf>, BackupError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut snapshots = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                snapshots.push(entry.path());
            }
        }
        snapshots.sort_by_key(|path| snapshot_sort_key(path));
        Ok(snapshots)
    }

    fn ensure_root(&self) -> Result<(), BackupError> {
        fs::create_dir_all(&self.root).map_err(|source| BackupError::CreateDir {
            path: self.root.clone(),
            source,
        })?;
        restrict(&self.root, 0o700).map_err(|source| BackupError::CreateDir {
            path: self.root.clone(),
            source,
        })
    }

    /// Create a fresh snapshot directory named after the current time.
    fn claim_snapshot_dir(&self) -> Result<PathBuf, BackupError> {
        let base = Local::now().format(SNAPSHOT_NAME_FORMAT).to_string();

        let mut attempt = 0u32;
        loop {
            let name = if attempt == 0 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            let candidate = self.root.join(name);

            match fs::create_dir(&candidate) {
                Ok(()) => {
                    restrict(&candidate, 0o700).map_err(|source| BackupError::CreateDir {
                        path: candidate.clone(),
                        source,
                    })?;
                    return Ok(candidate);
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(source) => {
                    return Err(BackupError::CreateDir {
                        path: candidate,
                        source,
                    })
                }
            }
        }
    }
}

/// Orders `20261016_031500` before `20261016_031500-1` before `-10`.
fn snapshot_sort_key(path: &Path) -> (String, u32) {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    match name.split_once('-') {
        Some((base, suffix)) => (base.to_string(), suffix.parse().unwrap_or(u32::MAX)),
        None => (name, 0),
    }
}

fn copy_error(from: &Path, to: &Path, source: io::Error) -> BackupError {
    BackupError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source,
    }
}

fn restrict(path: &Path, mode: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    let _ = (path, mode);
    Ok(())
}

//! In-memory remote used in place of a real certificate host.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{RemoteCopy, RemoteError};

/// Remote copy channel backed by a map of path to contents.
#[derive(Debug)]
pub struct MemoryRemote {
    name: String,
    files: Mutex<HashMap<String, Vec<u8>>>,
    reachable: AtomicBool,
    fetches: AtomicUsize,
}

impl MemoryRemote {
    /// Create a reachable remote with no files.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            files: Mutex::new(HashMap::new()),
            reachable: AtomicBool::new(true),
            fetches: AtomicUsize::new(0),
        }
    }

    /// Add or replace a file.
    pub fn insert(&self, path: impl Into<String>, contents: impl Into<Vec<u8>>) {
        self.files.lock().insert(path.into(), contents.into());
    }

    pub fn remove(&self, path: &str) {
        self.files.lock().remove(path);
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::Relaxed);
    }

    /// Number of successful fetches so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::Relaxed)
    }

    fn ensure_reachable(&self) -> Result<(), RemoteError> {
        if self.reachable.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(RemoteError::Unreachable(self.name.clone()))
        }
    }
}

#[async_trait]
impl RemoteCopy for MemoryRemote {
    async fn test_connection(&self) -> Result<(), RemoteError> {
        self.ensure_reachable()
    }

    async fn fetch(&self, remote_path: &str) -> Result<Vec<u8>, RemoteError> {
        self.ensure_reachable()?;
        let contents = self
            .files
            .lock()
            .get(remote_path)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(remote_path.to_string()))?;
        self.fetches.fetch_add(1, Ordering::Relaxed);
        Ok(contents)
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

//! In-memory service control that records requests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{ServiceControl, ServiceError};

/// Service control double with scriptable outcomes.
#[derive(Debug)]
pub struct MemoryService {
    active: AtomicBool,
    fail_restart: AtomicBool,
    active_after_restart: AtomicBool,
    restarts: AtomicUsize,
    history: Mutex<Vec<String>>,
}

impl MemoryService {
    /// A running service that restarts cleanly.
    pub fn new() -> Self {
        Self {
            active: AtomicBool::new(true),
            fail_restart: AtomicBool::new(false),
            active_after_restart: AtomicBool::new(true),
            restarts: AtomicUsize::new(0),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::Relaxed);
    }

    /// Make the next restarts fail outright.
    pub fn fail_restarts(&self, fail: bool) {
        self.fail_restart.store(fail, Ordering::Relaxed);
    }

    /// Make the service come back inactive after a restart.
    pub fn crash_after_restart(&self, crash: bool) {
        self.active_after_restart.store(!crash, Ordering::Relaxed);
    }

    pub fn restart_count(&self) -> usize {
        self.restarts.load(Ordering::Relaxed)
    }

    /// Service names that were restarted, in order.
    pub fn history(&self) -> Vec<String> {
        self.history.lock().clone()
    }
}

impl Default for MemoryService {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServiceControl for MemoryService {
    async fn restart(&self, name: &str) -> Result<(), ServiceError> {
        if self.fail_restart.load(Ordering::Relaxed) {
            return Err(ServiceError::Rejected(name.to_string()));
        }
        self.restarts.fetch_add(1, Ordering::Relaxed);
        self.history.lock().push(name.to_string());
        self.active
            .store(self.active_after_restart.load(Ordering::Relaxed), Ordering::Relaxed);
        Ok(())
    }

    async fn is_active(&self, _name: &str) -> Result<bool, ServiceError> {
        Ok(self.active.load(Ordering::Relaxed))
    }
}

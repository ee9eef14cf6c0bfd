//! Action lock - at most one mitigation mutates shared targets at a time

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Cloneable handle to one shared mutex. Engines working on the same target
/// set must be built with clones of the same lock.
#[derive(Debug, Clone, Default)]
pub struct ActionLock {
    inner: Arc<Mutex<()>>,
}

/// Held while a mitigation runs; released on drop
pub struct ActionGuard {
    _guard: OwnedMutexGuard<()>,
}

impl ActionLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self) -> ActionGuard {
        ActionGuard {
            _guard: self.inner.clone().lock_owned().await,
        }
    }

    /// Acquire with an upper bound on waiting
    pub async fn acquire_timeout(&self, timeout: Duration) -> Option<ActionGuard> {
        tokio::time::timeout(timeout, self.acquire()).await.ok()
    }

    pub fn is_locked(&self) -> bool {
        self.inner.try_lock().is_err()
    }
}

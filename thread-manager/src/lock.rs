//! Process-wide named locks

use parking_lot::{Mutex, MutexGuard};
use std::time::Duration;

/// Lock guarding resolution of inbound cloud deltas
pub const DELTA_LOCK: &str = "cloud-delta";

/// A mutex identified by a symbolic name
///
/// Obtained through [`ThreadManager::lock`](crate::ThreadManager::lock); one
/// instance exists per name.
pub struct NamedLock {
    name: String,
    mutex: Mutex<()>,
}

/// Guard for a held [`NamedLock`]; released on drop
pub type NamedLockGuard<'a> = MutexGuard<'a, ()>;

impl NamedLock {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            mutex: Mutex::new(()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Block until the lock is held
    pub fn acquire(&self) -> NamedLockGuard<'_> {
        if let Some(guard) = self.mutex.try_lock() {
            return guard;
        }
        tracing::trace!(lock = %self.name, "Waiting for named lock");
        self.mutex.lock()
    }

    /// Wait up to `timeout` for the lock
    pub fn try_acquire_for(&self, timeout: Duration) -> Option<NamedLockGuard<'_>> {
        self.mutex.try_lock_for(timeout)
    }

    pub fn is_locked(&self) -> bool {
        self.mutex.is_locked()
    }
}

impl std::fmt::Debug for NamedLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NamedLock")
            .field("name", &self.name)
            .field("locked", &self.is_locked())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_releases_on_drop() {
        let lock = NamedLock::new("x");
        {
            let _guard = lock.acquire();
            assert!(lock.is_locked());
            assert!(lock.try_acquire_for(Duration::from_millis(10)).is_none());
        }
        assert!(!lock.is_locked());
    }
}

//! Named worker threads
//!
//! Every unit of background work in the agent runs on a thread started through
//! [`ThreadManager::threaded`]. Daemon threads are detached; everything else is
//! retained and joined by [`ThreadManager::join_all`] at teardown.

use crate::error::{Result, ThreadError};
use crate::lock::NamedLock;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Owner of worker threads and named locks
///
/// Shared across components as `Arc<ThreadManager>`.
#[derive(Default)]
pub struct ThreadManager {
    handles: Mutex<Vec<(String, JoinHandle<()>)>>,
    locks: Mutex<HashMap<String, Arc<NamedLock>>>,
    spawned: AtomicUsize,
}

impl ThreadManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start building a thread
    ///
    /// `daemon` threads are detached and never joined.
    pub fn threaded(&self, daemon: bool) -> Threaded<'_> {
        Threaded {
            manager: self,
            daemon,
            name: None,
        }
    }

    /// The process-wide lock registered under `name`
    ///
    /// Every call with the same name returns the same instance.
    pub fn lock(&self, name: &str) -> Arc<NamedLock> {
        let mut locks = self.locks.lock();
        Arc::clone(
            locks
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(NamedLock::new(name))),
        )
    }

    /// Run `f` while holding the named lock
    ///
    /// The lock is released when `f` returns or unwinds.
    pub fn with_lock<R>(&self, name: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.lock(name);
        let _guard = lock.acquire();
        f()
    }

    /// Number of non-daemon threads not yet joined
    pub fn pending(&self) -> usize {
        self.handles.lock().len()
    }

    /// Join every retained thread
    ///
    /// Returns how many threads were joined.
    pub fn join_all(&self) -> usize {
        let handles: Vec<_> = std::mem::take(&mut *self.handles.lock());
        let count = handles.len();

        for (name, handle) in handles {
            tracing::debug!(thread = %name, "Joining thread");
            if handle.join().is_err() {
                tracing::error!(thread = %name, "Thread terminated abnormally");
            }
        }

        tracing::debug!("Joined {} threads", count);
        count
    }

    fn next_name(&self) -> String {
        format!("worker-{}", self.spawned.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Debug for ThreadManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadManager")
            .field("pending", &self.pending())
            .field("locks", &self.locks.lock().keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Builder returned by [`ThreadManager::threaded`]
#[must_use = "a thread is only started by calling spawn"]
pub struct Threaded<'a> {
    manager: &'a ThreadManager,
    daemon: bool,
    name: Option<String>,
}

impl Threaded<'_> {
    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Run `f` on a new OS thread
    ///
    /// A panic inside `f` is caught and logged with the thread name.
    pub fn spawn<F>(self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let name = self.name.unwrap_or_else(|| self.manager.next_name());
        let thread_name = name.clone();
        let daemon = self.daemon;

        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let span = tracing::debug_span!("thread", name = %thread_name, daemon);
                let _enter = span.enter();

                match catch_unwind(AssertUnwindSafe(f)) {
                    Ok(()) => tracing::trace!("Thread finished"),
                    Err(panic) => {
                        let message = if let Some(s) = panic.downcast_ref::<&str>() {
                            (*s).to_string()
                        } else if let Some(s) = panic.downcast_ref::<String>() {
                            s.clone()
                        } else {
                            "non-string panic payload".to_string()
                        };
                        tracing::error!("Thread panicked: {}", message);
                    }
                }
            })
            .map_err(|source| ThreadError::Spawn {
                name: name.clone(),
                source,
            })?;

        if daemon {
            tracing::debug!(thread = %name, "Daemon thread started");
        } else {
            tracing::debug!(thread = %name, "Thread started");
            self.manager.handles.lock().push((name, handle));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn test_spawn_and_join_all() {
        let manager = ThreadManager::new();
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            manager
                .threaded(false)
                .spawn(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
        }

        assert_eq!(manager.join_all(), 4);
        assert_eq!(counter.load(Ordering::SeqCst), 4);
        assert_eq!(manager.pending(), 0);
    }

    #[test]
    fn test_thread_carries_name() {
        let manager = ThreadManager::new();
        let (tx, rx) = mpsc::channel();

        manager
            .threaded(false)
            .set_name("telemetry")
            .spawn(move || {
                let name = thread::current().name().map(str::to_string);
                tx.send(name).unwrap();
            })
            .unwrap();

        assert_eq!(rx.recv().unwrap().as_deref(), Some("telemetry"));
        manager.join_all();
    }

    #[test]
    fn test_default_names_are_unique() {
        let manager = ThreadManager::new();
        assert_ne!(manager.next_name(), manager.next_name());
    }

    #[rstest]
    #[case::daemon(true, 0)]
    #[case::joined(false, 1)]
    fn test_daemon_threads_are_not_retained(#[case] daemon: bool, #[case] retained: usize) {
        let manager = ThreadManager::new();
        manager.threaded(daemon).spawn(|| {}).unwrap();
        assert_eq!(manager.pending(), retained);
        manager.join_all();
    }

    #[test]
    fn test_panicking_thread_is_contained() {
        let manager = ThreadManager::new();
        manager
            .threaded(false)
            .set_name("faulty")
            .spawn(|| panic!("resolver bug"))
            .unwrap();

        assert_eq!(manager.join_all(), 1);
    }

    #[test]
    fn test_lock_returns_shared_instance() {
        let manager = ThreadManager::new();
        let a = manager.lock("cloud-delta");
        let b = manager.lock("cloud-delta");
        let c = manager.lock("other");

        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(a.name(), "cloud-delta");
    }

    #[test]
    fn test_with_lock_serializes_sections() {
        let manager = Arc::new(ThreadManager::new());
        let inside = Arc::new(AtomicUsize::new(0));
        let overlap = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let m = Arc::clone(&manager);
            let inside = Arc::clone(&inside);
            let overlap = Arc::clone(&overlap);
            manager
                .threaded(false)
                .spawn(move || {
                    for _ in 0..20 {
                        m.with_lock("section", || {
                            if inside.fetch_add(1, Ordering::SeqCst) != 0 {
                                overlap.fetch_add(1, Ordering::SeqCst);
                            }
                            thread::sleep(Duration::from_micros(50));
                            inside.fetch_sub(1, Ordering::SeqCst);
                        });
                    }
                })
                .unwrap();
        }

        manager.join_all();
        assert_eq!(overlap.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_with_lock_releases_on_panic() {
        let manager = ThreadManager::new();

        let result = catch_unwind(AssertUnwindSafe(|| {
            manager.with_lock("fragile", || panic!("inside lock"));
        }));
        assert!(result.is_err());

        assert!(manager.lock("fragile").try_acquire_for(Duration::from_millis(100)).is_some());
    }
}

//! Blocking iterator over model commit events
//!
//! Consumers that render or mirror state (a local display, a log tail) watch
//! model keys on the store and drain commit events from this iterator:
//! - Blocking: `recv()`, `for event in iter`
//! - Non-blocking: `try_recv()`, `try_iter()`
//! - Timeout: `recv_timeout()`

use std::sync::{mpsc, Arc, Mutex};
use std::time::Duration;

use crate::event::CommitEvent;

/// Blocking iterator over commit events for watched models
///
/// All methods are synchronous. Clones of the store share one receiver, so
/// each event is delivered to exactly one consumer.
///
/// # Example
///
/// ```rust,ignore
/// store.watch(Device::KEY);
///
/// for event in store.iter() {
///     let device = store.snapshot::<Device>()?;
///     redraw(&device);
/// }
/// ```
pub struct ChangeIterator {
    rx: Arc<Mutex<mpsc::Receiver<CommitEvent>>>,
}

impl ChangeIterator {
    pub(crate) fn new(rx: Arc<Mutex<mpsc::Receiver<CommitEvent>>>) -> Self {
        Self { rx }
    }

    /// Block until the next event is available
    ///
    /// Returns `None` if the channel is closed.
    pub fn recv(&self) -> Option<CommitEvent> {
        self.rx.lock().ok()?.recv().ok()
    }

    /// Block until the next event or until `timeout` expires
    pub fn recv_timeout(&self, timeout: Duration) -> Option<CommitEvent> {
        self.rx.lock().ok()?.recv_timeout(timeout).ok()
    }

    /// Receive an event without blocking
    pub fn try_recv(&self) -> Option<CommitEvent> {
        self.rx.lock().ok()?.try_recv().ok()
    }

    /// Drain the events that are currently queued without blocking
    pub fn try_iter(&self) -> TryIter<'_> {
        TryIter { inner: self }
    }
}

impl Iterator for ChangeIterator {
    type Item = CommitEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.recv()
    }
}

/// Non-blocking iterator over currently queued events
pub struct TryIter<'a> {
    inner: &'a ChangeIterator,
}

impl<'a> Iterator for TryIter<'a> {
    type Item = CommitEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.try_recv()
    }
}

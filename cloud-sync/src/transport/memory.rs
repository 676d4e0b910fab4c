//! In-process broker, used for local simulation and tests

use super::{Message, Transport};
use crate::error::TransportError;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::Duration;

struct Shared {
    reachable: AtomicBool,
    connected: AtomicBool,
    subscriptions: Mutex<HashSet<String>>,
    rejected: Mutex<HashSet<String>>,
    published: Mutex<Vec<Message>>,
    inbound_tx: Sender<Message>,
    inbound_rx: Mutex<Receiver<Message>>,
}

/// A transport whose "broker" lives in the same process
///
/// Clones share one broker, so a test can keep a handle to inject inbound
/// messages, inspect what was published and simulate outages.
#[derive(Clone)]
pub struct MemoryTransport {
    shared: Arc<Shared>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = mpsc::channel();
        Self {
            shared: Arc::new(Shared {
                reachable: AtomicBool::new(true),
                connected: AtomicBool::new(false),
                subscriptions: Mutex::new(HashSet::new()),
                rejected: Mutex::new(HashSet::new()),
                published: Mutex::new(Vec::new()),
                inbound_tx,
                inbound_rx: Mutex::new(inbound_rx),
            }),
        }
    }

    /// Make subsequent connect attempts succeed or fail
    pub fn set_reachable(&self, reachable: bool) {
        self.shared.reachable.store(reachable, Ordering::SeqCst);
    }

    /// Simulate the broker dropping the connection
    pub fn drop_connection(&self) {
        if self.shared.connected.swap(false, Ordering::SeqCst) {
            tracing::debug!("Memory broker dropped the connection");
        }
    }

    /// Refuse every later publish on `topic`
    pub fn reject_topic(&self, topic: impl Into<String>) {
        self.shared.rejected.lock().insert(topic.into());
    }

    /// Deliver a message as if the broker had sent it
    ///
    /// Returns false if nothing is subscribed to the topic.
    pub fn inject(&self, topic: &str, payload: &str) -> bool {
        if !self.shared.subscriptions.lock().contains(topic) {
            tracing::trace!(topic, "Dropping message for unsubscribed topic");
            return false;
        }
        self.shared
            .inbound_tx
            .send(Message::new(topic, payload))
            .is_ok()
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.shared.subscriptions.lock().contains(topic)
    }

    /// Everything published so far
    pub fn published(&self) -> Vec<Message> {
        self.shared.published.lock().clone()
    }

    /// Payloads published on one topic, oldest first
    pub fn published_on(&self, topic: &str) -> Vec<String> {
        self.shared
            .published
            .lock()
            .iter()
            .filter(|m| m.topic == topic)
            .map(|m| m.payload.clone())
            .collect()
    }

    pub fn clear_published(&self) {
        self.shared.published.lock().clear();
    }
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MemoryTransport {
    fn connect(&self, _timeout: Duration) -> Result<(), TransportError> {
        if !self.shared.reachable.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("memory broker offline".into()));
        }
        self.shared.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        self.shared.subscriptions.lock().insert(topic.to_string());
        Ok(())
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected);
        }
        if self.shared.rejected.lock().contains(topic) {
            return Err(TransportError::Rejected(topic.to_string()));
        }
        self.shared.published.lock().push(Message::new(topic, payload));
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::ConnectionLost);
        }
        match self.shared.inbound_rx.lock().recv_timeout(timeout) {
            Ok(message) => Ok(Some(message)),
            Err(RecvTimeoutError::Timeout) => {
                if self.is_connected() {
                    Ok(None)
                } else {
                    Err(TransportError::ConnectionLost)
                }
            }
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::ConnectionLost),
        }
    }

    fn disconnect(&self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        self.shared.subscriptions.lock().clear();
    }

    fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
    }
}

//! Broker transports
//!
//! The client talks to the cloud broker through the [`Transport`] trait.
//! Methods take `&self`: the receive loop and the telemetry publisher use the
//! same transport from different threads, and implementations keep their read
//! and write sides independently synchronized so a blocked receive never
//! delays a publish.

mod memory;
mod tcp;

pub use memory::MemoryTransport;
pub use tcp::TcpBridgeTransport;

use crate::error::TransportError;
use std::time::Duration;

/// One message on a topic
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub topic: String,
    /// JSON text
    pub payload: String,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

pub trait Transport: Send + Sync {
    /// Establish the broker connection, giving up after `timeout`
    fn connect(&self, timeout: Duration) -> Result<(), TransportError>;

    fn subscribe(&self, topic: &str) -> Result<(), TransportError>;

    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError>;

    /// Wait up to `timeout` for the next inbound message
    ///
    /// `Ok(None)` means the wait timed out with the connection intact.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, TransportError>;

    fn disconnect(&self);

    fn is_connected(&self) -> bool;
}

//! TCP bridge transport
//!
//! Talks to a local broker bridge over a plain TCP socket using one JSON
//! object per line:
//!
//! ```text
//! -> {"op":"subscribe","topic":"devices/dev-1/shadow/delta"}
//! -> {"topic":"devices/dev-1/telemetry","payload":{"tele_test":1700000000}}
//! <- {"topic":"devices/dev-1/shadow/delta","payload":{"req_id":"r1","state":{"desired":{"TP":37.0}}}}
//! ```

use super::{Message, Transport};
use crate::error::TransportError;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
enum FrameOp {
    Subscribe,
}

#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    op: Option<FrameOp>,
    topic: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    payload: serde_json::Value,
}

struct ReadHalf {
    reader: BufReader<TcpStream>,
    /// Bytes of a line not yet terminated when the last read timed out
    pending: Vec<u8>,
}

pub struct TcpBridgeTransport {
    address: String,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<ReadHalf>>,
}

impl TcpBridgeTransport {
    /// `address` is `host:port`; it is resolved on every connect
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            writer: Mutex::new(None),
            reader: Mutex::new(None),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn resolve(&self) -> Result<Vec<SocketAddr>, TransportError> {
        let addrs: Vec<SocketAddr> = self
            .address
            .to_socket_addrs()
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", self.address, e)))?
            .collect();
        if addrs.is_empty() {
            return Err(TransportError::Unreachable(format!(
                "{}: no addresses",
                self.address
            )));
        }
        Ok(addrs)
    }

    fn send_frame(&self, frame: &Frame) -> Result<(), TransportError> {
        let mut line = serde_json::to_vec(frame)?;
        line.push(b'\n');

        let mut writer = self.writer.lock();
        let stream = writer.as_mut().ok_or(TransportError::NotConnected)?;
        if let Err(e) = stream.write_all(&line).and_then(|_| stream.flush()) {
            tracing::debug!("Bridge write failed: {}", e);
            *writer = None;
            return Err(TransportError::Io(e));
        }
        Ok(())
    }

    /// Decode one bridge line; undecodable frames are logged and dropped
    fn parse_line(line: &[u8]) -> Option<Message> {
        let text = String::from_utf8_lossy(line);
        let text = text.trim();
        if text.is_empty() {
            return None;
        }
        let frame: Frame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!("Dropping undecodable bridge frame: {}", e);
                return None;
            }
        };
        let payload = match frame.payload {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Some(Message::new(frame.topic, payload))
    }
}

impl Transport for TcpBridgeTransport {
    fn connect(&self, timeout: Duration) -> Result<(), TransportError> {
        let mut last_error = None;
        for addr in self.resolve()? {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    let read_stream = stream.try_clone()?;
                    *self.reader.lock() = Some(ReadHalf {
                        reader: BufReader::new(read_stream),
                        pending: Vec::new(),
                    });
                    *self.writer.lock() = Some(stream);
                    tracing::info!("Connected to broker bridge at {}", addr);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    last_error = Some(TransportError::ConnectTimeout(timeout));
                }
                Err(e) => last_error = Some(TransportError::Io(e)),
            }
        }
        Err(last_error.unwrap_or(TransportError::NotConnected))
    }

    fn subscribe(&self, topic: &str) -> Result<(), TransportError> {
        self.send_frame(&Frame {
            op: Some(FrameOp::Subscribe),
            topic: topic.to_string(),
            payload: serde_json::Value::Null,
        })
    }

    fn publish(&self, topic: &str, payload: &str) -> Result<(), TransportError> {
        // Embed JSON payloads as objects; anything else travels as a string
        let payload = serde_json::from_str(payload)
            .unwrap_or_else(|_| serde_json::Value::String(payload.to_string()));
        self.send_frame(&Frame {
            op: None,
            topic: topic.to_string(),
            payload,
        })
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Message>, TransportError> {
        let mut guard = self.reader.lock();
        let half = guard.as_mut().ok_or(TransportError::NotConnected)?;

        // A zero read timeout is rejected by the socket API
        let timeout = timeout.max(Duration::from_millis(1));
        half.reader.get_ref().set_read_timeout(Some(timeout))?;

        match half.reader.read_until(b'\n', &mut half.pending) {
            Ok(0) => {
                *guard = None;
                *self.writer.lock() = None;
                Err(TransportError::ConnectionLost)
            }
            Ok(_) if half.pending.ends_with(b"\n") => {
                let line = std::mem::take(&mut half.pending);
                Ok(Self::parse_line(&line))
            }
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Ok(None),
            Err(e) => {
                *guard = None;
                *self.writer.lock() = None;
                Err(TransportError::Io(e))
            }
        }
    }

    fn disconnect(&self) {
        if let Some(stream) = self.writer.lock().take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
        }
        *self.reader.lock() = None;
    }

    fn is_connected(&self) -> bool {
        self.writer.lock().is_some()
    }
}

impl std::fmt::Debug for TcpBridgeTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpBridgeTransport")
            .field("address", &self.address)
            .field("connected", &self.is_connected())
            .finish()
    }
}

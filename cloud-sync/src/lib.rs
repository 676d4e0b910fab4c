//! Cloud synchronization for the incubator agent
//!
//! - [`CloudSyncClient`]: broker connection state machine with unbounded retry;
//!   routes inbound desired-state deltas and image requests
//! - [`DeltaResolver`]: applies a delta key by key through state transactions,
//!   recording per-key failures in the [`ErrorBuffer`]
//! - [`TelemetryPublisher`]: periodic heartbeat and telemetry documents
//! - [`transport`]: the [`Transport`] trait with an in-memory broker and a TCP
//!   JSON-lines bridge
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use cloud_sync::{ClientSettings, CloudSyncClient, MemoryTransport, TopicTemplates, Topics};
//!
//! let transport = MemoryTransport::new();
//! let client = CloudSyncClient::new(
//!     Arc::new(transport.clone()),
//!     Topics::new(&TopicTemplates::default(), "dev-1"),
//!     state,
//!     threads,
//!     ClientSettings::default(),
//!     shutdown,
//! );
//! client.start()?;
//! ```

pub mod client;
pub mod delta;
pub mod error;
pub mod message;
pub mod telemetry;
pub mod topics;
pub mod transport;

pub use client::{ClientSettings, CloudSyncClient, ConnectionState};
pub use delta::{DeltaKey, DeltaResolver, ErrorBuffer, ResolveReport};
pub use error::{CloudError, ProtocolError, ResolveError, Result, TransportError};
pub use message::{DeltaMessage, ImageRequest, InboundMessage};
pub use telemetry::{PointType, TelemetryDocument, TelemetryOutcome, TelemetryPublisher, TelemetrySettings};
pub use topics::{TopicTemplates, Topics};
pub use transport::{MemoryTransport, Message, TcpBridgeTransport, Transport};

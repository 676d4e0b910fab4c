//! Cloud sync client
//!
//! # Connection lifecycle
//!
//! ```text
//! Disconnected ──connect()──▶ Connecting ──ok──▶ Connected
//!      ▲                          │                  │
//!      │                        error          receive error
//!      └──── retry delay ◀────────┴──────────────────┘
//! ```
//!
//! Entering `Connected` subscribes the inbound topics, triggers *renew
//! credentials* and *new device*, and marks the device connected. Dropping to
//! `Disconnected` marks it disconnected. Retries never stop until shutdown.
//!
//! Each inbound message is handled on its own thread so a slow delta never
//! blocks the receive loop.

use crate::delta::{DeltaResolver, ErrorBuffer, ResolveReport};
use crate::error::{Result, TransportError};
use crate::message::{DeltaMessage, ImageRequest, InboundMessage};
use crate::topics::Topics;
use crate::transport::{Message, Transport};
use incubator_state::models::Device;
use incubator_state::{CaptureRequest, EventArgs, EventName, StateManager};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thread_manager::{ShutdownSignal, ThreadManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Timing of the connection loop
#[derive(Debug, Clone)]
pub struct ClientSettings {
    /// Upper bound on a single connect attempt
    pub connect_timeout: Duration,
    /// Wait between a failure and the next attempt
    pub retry_delay: Duration,
    /// Receive wait; bounds how long shutdown takes to be noticed
    pub poll_interval: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            retry_delay: Duration::from_secs(5),
            poll_interval: Duration::from_millis(500),
        }
    }
}

struct ClientInner {
    transport: Arc<dyn Transport>,
    topics: Topics,
    state: StateManager,
    threads: Arc<ThreadManager>,
    resolver: DeltaResolver,
    settings: ClientSettings,
    connection: Mutex<ConnectionState>,
    attempts: AtomicU64,
    shutdown: ShutdownSignal,
}

/// Handle to the cloud connection; clones share one connection
#[derive(Clone)]
pub struct CloudSyncClient {
    inner: Arc<ClientInner>,
}

impl CloudSyncClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        topics: Topics,
        state: StateManager,
        threads: Arc<ThreadManager>,
        settings: ClientSettings,
        shutdown: ShutdownSignal,
    ) -> Self {
        let resolver = DeltaResolver::new(state.clone(), Arc::clone(&threads), ErrorBuffer::new());
        Self {
            inner: Arc::new(ClientInner {
                transport,
                topics,
                state,
                threads,
                resolver,
                settings,
                connection: Mutex::new(ConnectionState::Disconnected),
                attempts: AtomicU64::new(0),
                shutdown,
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.connection.lock()
    }

    /// Connect attempts made so far, successful or not
    pub fn connect_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }

    pub fn topics(&self) -> &Topics {
        &self.inner.topics
    }

    /// Resolution failures not yet reported by telemetry
    pub fn errors(&self) -> &ErrorBuffer {
        self.inner.resolver.errors()
    }

    /// Run the connection loop on a named thread
    pub fn start(&self) -> Result<()> {
        let client = self.clone();
        self.inner
            .threads
            .threaded(false)
            .set_name("cloud-sync")
            .spawn(move || client.run())?;
        Ok(())
    }

    /// Stop the connection loop and close the transport
    pub fn shutdown(&self) {
        self.inner.shutdown.trigger();
        self.inner.transport.disconnect();
    }

    /// Publish on `topic` if connected
    pub fn publish(&self, topic: &str, payload: &str) -> std::result::Result<(), TransportError> {
        if self.state() != ConnectionState::Connected {
            return Err(TransportError::NotConnected);
        }
        self.inner.transport.publish(topic, payload)
    }

    /// Connection loop; returns once shutdown is triggered
    pub fn run(&self) {
        let settings = &self.inner.settings;
        tracing::info!(device = self.inner.topics.device_id(), "Cloud sync started");

        while !self.inner.shutdown.is_triggered() {
            match self.connect_once() {
                Ok(()) => {
                    let reason = self.receive_loop();
                    if self.inner.shutdown.is_triggered() {
                        break;
                    }
                    tracing::warn!("Connection lost: {}", reason);
                }
                Err(e) => {
                    tracing::warn!(
                        attempt = self.connect_attempts(),
                        "Connect failed: {}, retrying in {:?}",
                        e,
                        settings.retry_delay
                    );
                }
            }

            self.on_disconnected();
            if self.inner.shutdown.wait_timeout(settings.retry_delay) {
                break;
            }
        }

        self.on_disconnected();
        tracing::info!("Cloud sync stopped");
    }

    fn connect_once(&self) -> std::result::Result<(), TransportError> {
        self.set_connection(ConnectionState::Connecting);
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);

        let transport = &self.inner.transport;
        transport.connect(self.inner.settings.connect_timeout)?;
        for topic in self.inner.topics.inbound() {
            transport.subscribe(topic)?;
        }

        self.on_connected();
        Ok(())
    }

    fn on_connected(&self) {
        self.set_connection(ConnectionState::Connected);
        tracing::info!("Connected to cloud broker");

        let registry = self.inner.state.registry();
        registry.trigger(EventName::RenewCredentials, &EventArgs::None);
        registry.trigger(EventName::NewDevice, &EventArgs::None);
        self.set_device_connected(true);
    }

    fn on_disconnected(&self) {
        self.inner.transport.disconnect();
        self.set_connection(ConnectionState::Disconnected);
        self.set_device_connected(false);
    }

    fn set_device_connected(&self, connected: bool) {
        match self
            .inner
            .state
            .update::<Device, _>(|device| device.connected = Some(connected))
        {
            Ok(true) => {}
            Ok(false) => tracing::warn!("Device rejected connectivity update"),
            Err(e) => tracing::error!("Failed to update device connectivity: {}", e),
        }
    }

    fn set_connection(&self, state: ConnectionState) {
        let mut current = self.inner.connection.lock();
        if *current != state {
            tracing::debug!("Connection state {:?} -> {:?}", *current, state);
            *current = state;
        }
    }

    /// Receive until the transport fails or shutdown is triggered
    fn receive_loop(&self) -> TransportError {
        loop {
            if self.inner.shutdown.is_triggered() {
                return TransportError::NotConnected;
            }
            match self.inner.transport.recv_timeout(self.inner.settings.poll_interval) {
                Ok(Some(message)) => self.dispatch(message),
                Ok(None) => {}
                Err(e) => return e,
            }
        }
    }

    /// Handle one inbound message on its own thread
    pub fn dispatch(&self, message: Message) {
        let client = self.clone();
        let spawned = self
            .inner
            .threads
            .threaded(true)
            .set_name("cloud-message")
            .spawn(move || {
                client.handle(&message);
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to start message handler: {}", e);
        }
    }

    /// Parse and act on one inbound message on the calling thread
    ///
    /// Returns the delta report for desired-state messages.
    pub fn handle(&self, message: &Message) -> Option<ResolveReport> {
        match InboundMessage::parse(&self.inner.topics, message) {
            Ok(InboundMessage::Delta(delta)) => Some(self.resolve(&delta)),
            Ok(InboundMessage::ImageRequest(request)) => {
                self.request_image(request);
                None
            }
            Err(e) => {
                tracing::warn!("Dropping inbound message: {}", e);
                None
            }
        }
    }

    fn resolve(&self, delta: &DeltaMessage) -> ResolveReport {
        tracing::debug!(req = %delta.req_id, "Resolving delta with {} keys", delta.desired.len());
        self.inner.resolver.resolve(&delta.req_id, &delta.desired)
    }

    fn request_image(&self, request: ImageRequest) {
        let event = request.kind.event();
        tracing::debug!("Image request {:?} -> {}", request.kind, event);
        self.inner
            .state
            .registry()
            .trigger(event, &EventArgs::Capture(CaptureRequest::new(request.kind)));
    }
}

impl std::fmt::Debug for CloudSyncClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudSyncClient")
            .field("state", &self.state())
            .field("attempts", &self.connect_attempts())
            .field("device", &self.inner.topics.device_id())
            .finish()
    }
}

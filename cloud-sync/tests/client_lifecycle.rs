//! Connection lifecycle and inbound routing against the in-memory broker

use cloud_sync::{
    ClientSettings, CloudSyncClient, ConnectionState, DeltaKey, MemoryTransport, Message,
    TopicTemplates, Topics,
};
use incubator_state::models::{Device, Icb, IcbLimits, Setpoint};
use incubator_state::{CaptureKind, EventArgs, EventName, Registry, StateManager};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thread_manager::{ShutdownSignal, ThreadManager};

struct Harness {
    transport: MemoryTransport,
    client: CloudSyncClient,
    state: StateManager,
    registry: Arc<Registry>,
    threads: Arc<ThreadManager>,
}

fn harness() -> Harness {
    let registry = Arc::new(Registry::new());
    let state = StateManager::new(
        Arc::clone(&registry),
        Device::new("dev-1", "Bench A"),
        IcbLimits::default(),
    )
    .unwrap();
    let threads = Arc::new(ThreadManager::new());
    let transport = MemoryTransport::new();
    let client = CloudSyncClient::new(
        Arc::new(transport.clone()),
        Topics::new(&TopicTemplates::default(), "dev-1"),
        state.clone(),
        Arc::clone(&threads),
        ClientSettings {
            connect_timeout: Duration::from_millis(50),
            retry_delay: Duration::from_millis(5),
            poll_interval: Duration::from_millis(10),
        },
        ShutdownSignal::new(),
    );
    Harness {
        transport,
        client,
        state,
        registry,
        threads,
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    false
}

fn counter(registry: &Registry, name: EventName) -> Arc<AtomicUsize> {
    let hits = Arc::new(AtomicUsize::new(0));
    let h = Arc::clone(&hits);
    registry.register(name, 0, move |_| {
        h.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    hits
}

#[test]
fn test_keeps_retrying_while_broker_unreachable() {
    let h = harness();
    h.transport.set_reachable(false);
    h.client.start().unwrap();

    assert!(wait_until(|| h.client.connect_attempts() >= 5));
    assert_ne!(h.client.state(), ConnectionState::Connected);
    assert_eq!(h.state.snapshot::<Device>().unwrap().connected, Some(false));

    // Once the broker comes back the same loop connects
    h.transport.set_reachable(true);
    assert!(wait_until(|| h.client.state() == ConnectionState::Connected));
    assert!(h.state.snapshot::<Device>().unwrap().is_connected());

    h.client.shutdown();
    h.threads.join_all();
    assert_eq!(h.client.state(), ConnectionState::Disconnected);
}

#[test]
fn test_entering_connected_subscribes_and_announces() {
    let h = harness();
    let renew = counter(&h.registry, EventName::RenewCredentials);
    let new_device = counter(&h.registry, EventName::NewDevice);

    h.client.start().unwrap();
    assert!(wait_until(|| h.client.state() == ConnectionState::Connected));

    let topics = h.client.topics();
    assert!(h.transport.is_subscribed(&topics.desired));
    assert!(h.transport.is_subscribed(&topics.image_request));
    assert_eq!(renew.load(Ordering::SeqCst), 1);
    assert_eq!(new_device.load(Ordering::SeqCst), 1);

    h.client.shutdown();
    h.threads.join_all();
}

#[test]
fn test_reconnects_after_connection_drop() {
    let h = harness();
    h.client.start().unwrap();
    assert!(wait_until(|| h.client.state() == ConnectionState::Connected));
    let attempts = h.client.connect_attempts();

    h.transport.drop_connection();
    assert!(wait_until(|| h.client.connect_attempts() > attempts
        && h.client.state() == ConnectionState::Connected));

    h.client.shutdown();
    h.threads.join_all();
}

#[test]
fn test_inbound_delta_resolved_on_message_thread() {
    let h = harness();
    h.client.start().unwrap();
    assert!(wait_until(|| h.client.state() == ConnectionState::Connected));

    let desired = h.client.topics().desired.clone();
    assert!(h.transport.inject(
        &desired,
        r#"{"req_id": "r-9", "state": {"desired": {"TP": 36.0, "bogus_key": 1}}}"#,
    ));

    assert!(wait_until(|| h.state.snapshot::<Icb>().unwrap().tp == Setpoint::new(36.0)));
    assert!(h.client.errors().is_empty());

    h.client.shutdown();
    h.threads.join_all();
}

#[test]
fn test_handle_reports_failed_keys() {
    let h = harness();
    let message = Message::new(
        h.client.topics().desired.clone(),
        r#"{"req_id": "r-1", "state": {"desired": {"TP": 9999, "OP": 18.0}}}"#,
    );

    let report = h.client.handle(&message).unwrap();
    assert_eq!(report.failed, vec![DeltaKey::Tp]);
    assert_eq!(report.applied, vec![DeltaKey::Op]);
    assert_eq!(h.client.errors().snapshot(), vec!["REQ:r-1: Failed to resolve TP".to_string()]);
}

#[test]
fn test_malformed_message_never_reaches_state() {
    let h = harness();
    let revision = h.state.revision::<Icb>().unwrap();

    let message = Message::new(h.client.topics().desired.clone(), "{\"req_id\": ");
    assert!(h.client.handle(&message).is_none());
    assert_eq!(h.state.revision::<Icb>().unwrap(), revision);
    assert!(h.client.errors().is_empty());
}

#[test]
fn test_image_requests_trigger_capture_events() {
    let h = harness();
    let seen = Arc::new(Mutex::new(Vec::new()));

    for name in [EventName::BeginThumbnailCapture, EventName::BeginPreviewCapture] {
        let seen = Arc::clone(&seen);
        h.registry.register(name, 0, move |args| {
            if let EventArgs::Capture(request) = args {
                seen.lock().push((name, request.kind));
            }
            Ok(())
        });
    }

    let topic = h.client.topics().image_request.clone();
    for kind in ["experiment", "dpc-capture", "gfp-capture"] {
        h.client
            .handle(&Message::new(topic.clone(), format!(r#"{{"type": "{kind}"}}"#)));
    }

    assert_eq!(
        *seen.lock(),
        vec![
            (EventName::BeginThumbnailCapture, CaptureKind::Experiment),
            (EventName::BeginPreviewCapture, CaptureKind::Dpc),
            (EventName::BeginPreviewCapture, CaptureKind::Gfp),
        ]
    );
}

#[test]
fn test_token_delta_registers_device() {
    use jsonwebtoken::{encode, EncodingKey, Header};

    let h = harness();
    let token = encode(
        &Header::default(),
        &serde_json::json!({"sub": "dev-1", "labId": "lab-42"}),
        &EncodingKey::from_secret(b"broker-secret"),
    )
    .unwrap();
    let payload = serde_json::json!({"req_id": "r-2", "state": {"desired": {"token": token}}});

    let report = h
        .client
        .handle(&Message::new(h.client.topics().desired.clone(), payload.to_string()))
        .unwrap();

    assert_eq!(report.applied, vec![DeltaKey::Token]);
    let device = h.state.snapshot::<Device>().unwrap();
    assert_eq!(device.lab_id(), Some("lab-42"));
    assert!(device.registered());
}

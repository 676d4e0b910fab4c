//! Whole-agent runs against simulated collaborators

use chrono::Utc;
use cloud_sync::{ConnectionState, MemoryTransport};
use incubator_agent::capture::{MemoryFrameSink, SimulatedCamera};
use incubator_agent::credentials::{CredentialError, CredentialKind};
use incubator_agent::display::LogDisplay;
use incubator_agent::hardware::{Actuator, SimulatedBoard};
use incubator_agent::records::MemoryRecords;
use incubator_agent::{Agent, AgentConfig, AgentError, Collaborators, ConfigError};
use incubator_state::models::{Experiment, Icb, Protocol, ProtocolStep, Setpoint};
use incubator_state::{EventName, StatusLevel};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Sim {
    transport: MemoryTransport,
    board: Arc<SimulatedBoard>,
    camera: Arc<SimulatedCamera>,
    frames: Arc<MemoryFrameSink>,
    records: Arc<MemoryRecords>,
}

impl Sim {
    fn new() -> Self {
        Self {
            transport: MemoryTransport::new(),
            board: Arc::new(SimulatedBoard::new()),
            camera: Arc::new(SimulatedCamera::default()),
            frames: Arc::new(MemoryFrameSink::new()),
            records: Arc::new(MemoryRecords::new()),
        }
    }

    fn collaborators(&self) -> Collaborators {
        Collaborators {
            transport: Arc::new(self.transport.clone()),
            hardware: self.board.clone(),
            camera: self.camera.clone(),
            frames: self.frames.clone(),
            display: Arc::new(LogDisplay),
            records: self.records.clone(),
        }
    }
}

fn fast_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.cloud.device_id = "inc-7".into();
    config.cloud.device_name = "Bench A".into();
    config.cloud.connect_timeout_secs = 1;
    config.cloud.retry_delay_secs = 0;
    config.cloud.poll_interval_ms = 10;
    config.telemetry.period_secs = 1;
    config.scheduler.tick_interval_ms = 10;
    config.hardware.poll_interval_ms = 10;
    config.hardware.display_refresh_ms = 20;
    config
}

fn provision(dir: &Path, skip: &[&str]) {
    for name in ["device.pem.crt", "private.pem.key", "root-ca.pem", "hardware.json"] {
        if !skip.contains(&name) {
            std::fs::write(dir.join(name), "x").unwrap();
        }
    }
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_full_run_with_simulated_collaborators() {
    let sim = Sim::new();
    let agent = Agent::new(fast_config(), sim.collaborators()).unwrap();
    agent.start().unwrap();

    // Connects, polls the board and publishes telemetry
    assert!(wait_until(|| agent.client().state() == ConnectionState::Connected));
    assert!(wait_until(|| agent.state().snapshot::<Icb>().unwrap().initialized));
    let telemetry_topic = agent.client().topics().telemetry.clone();
    assert!(wait_until(|| sim
        .transport
        .published_on(&telemetry_topic)
        .iter()
        .any(|p| p.contains("\"shadow\""))));

    // A cloud delta reaches the actuators
    let desired = agent.client().topics().desired.clone();
    assert!(sim.transport.inject(
        &desired,
        r#"{"req_id": "r-1", "state": {"desired": {"TP": 35.5}}}"#
    ));
    assert!(wait_until(|| sim.board.target(Actuator::Temperature) == Some(35.5)));

    // Refreshed protocol and experiment records drive setpoints and thumbnails
    sim.records.set_protocol(Protocol {
        id: Some("p-1".into()),
        steps: vec![ProtocolStep {
            offset_secs: 0,
            tp: None,
            cp: Some(Setpoint::new(6.5)),
            op: None,
        }],
        imaging_interval_secs: Some(3600),
    });
    sim.records.set_experiment({
        let mut experiment = Experiment::default();
        experiment.start("exp-1", Utc::now());
        experiment
    });
    assert!(sim.transport.inject(
        &desired,
        r#"{"req_id": "r-2", "state": {"desired": {"refresh_experiment": true, "refresh_protocol": true}}}"#
    ));

    assert!(wait_until(|| sim.board.target(Actuator::Co2) == Some(6.5)));
    assert!(wait_until(|| sim.frames.len() == 1));
    assert_eq!(sim.frames.locations()[0], "experiments/exp-1/thumbnails/000000.raw");
    assert_eq!(sim.camera.captures(), 1);

    assert_eq!(agent.shutdown(), 5);
    assert_eq!(agent.client().state(), ConnectionState::Disconnected);
}

#[test]
fn test_refresh_events_have_agent_subscribers() {
    let sim = Sim::new();
    let agent = Agent::new(fast_config(), sim.collaborators()).unwrap();
    let registry = agent.state().registry();

    for name in [
        EventName::NewExperiment,
        EventName::NewProtocol,
        EventName::NewDevice,
        EventName::RenewCredentials,
    ] {
        assert!(registry.bus(name).subscriber_count() >= 1, "no subscriber for {}", name);
    }
}

#[test]
fn test_invalid_config_rejected_before_start() {
    let sim = Sim::new();
    let mut config = fast_config();
    config.cloud.device_id.clear();

    assert!(matches!(
        Agent::new(config, sim.collaborators()),
        Err(AgentError::Config(ConfigError::Invalid { field: "cloud.device_id", .. }))
    ));
}

#[test]
fn test_missing_hardware_credential_is_a_warning() {
    let dir = tempfile::tempdir().unwrap();
    provision(dir.path(), &["hardware.json"]);
    let mut config = fast_config();
    config.credentials.directory = Some(dir.path().to_path_buf());

    let sim = Sim::new();
    let agent = Agent::new(config, sim.collaborators()).unwrap();

    assert!(!agent.credentials().hardware_available);
    let status = agent.display().last_status().unwrap();
    assert_eq!(status.level, StatusLevel::Warning);
    assert_eq!(status.component, "hardware");
}

#[test]
fn test_missing_certificate_is_fatal() {
    let dir = tempfile::tempdir().unwrap();
    provision(dir.path(), &["device.pem.crt"]);
    let mut config = fast_config();
    config.credentials.directory = Some(dir.path().to_path_buf());

    let sim = Sim::new();
    match Agent::new(config, sim.collaborators()) {
        Err(AgentError::Credentials(CredentialError::Missing { kind, .. })) => {
            assert_eq!(kind, CredentialKind::Certificate)
        }
        Err(other) => panic!("expected a missing certificate, got {}", other),
        Ok(_) => panic!("expected a missing certificate"),
    }
}

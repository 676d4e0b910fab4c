//! Agent wiring
//!
//! Builds the registry and state manager, connects the collaborators to their
//! events and owns every long-running thread. Startup order:
//!
//! 1. validate configuration and provisioning files
//! 2. state manager with the configured device and limits
//! 3. actuator subscriber, record refreshers, capture pipelines, display
//!    subscriber
//! 4. threads: cloud sync, telemetry, scheduler, board poller, display

use crate::capture::{attach_capture, Camera, FrameSink, MemoryFrameSink, SimulatedCamera};
use crate::config::AgentConfig;
use crate::credentials::{self, CredentialReport};
use crate::display::{DisplayRefresher, LogDisplay, StatusDisplay};
use crate::error::Result;
use crate::hardware::{attach_actuators, HardwareIo, IcbPoller, SimulatedBoard};
use crate::records::{attach_records, JsonDirectoryRecords, MemoryRecords, RecordSource};
use cloud_sync::{CloudSyncClient, MemoryTransport, TcpBridgeTransport, TelemetryPublisher, Topics, Transport};
use incubator_scheduler::ProtocolScheduler;
use incubator_state::models::Device;
use incubator_state::{Registry, StateManager, StatusLevel, SystemStatus};
use std::sync::Arc;
use thread_manager::{ShutdownSignal, ThreadManager};

/// External systems the agent talks to
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub hardware: Arc<dyn HardwareIo>,
    pub camera: Arc<dyn Camera>,
    pub frames: Arc<dyn FrameSink>,
    pub display: Arc<dyn StatusDisplay>,
    pub records: Arc<dyn RecordSource>,
}

impl Collaborators {
    /// In-memory broker, simulated board and camera, log display
    pub fn simulated() -> Self {
        Self {
            transport: Arc::new(MemoryTransport::new()),
            hardware: Arc::new(SimulatedBoard::new()),
            camera: Arc::new(SimulatedCamera::default()),
            frames: Arc::new(MemoryFrameSink::new()),
            display: Arc::new(LogDisplay),
            records: Arc::new(MemoryRecords::new()),
        }
    }

    /// Simulated collaborators, with the TCP bridge and the record directory
    /// when `config` names them
    pub fn for_config(config: &AgentConfig) -> Self {
        let mut collaborators = Self::simulated();
        if let Some(address) = &config.cloud.bridge {
            collaborators.transport = Arc::new(TcpBridgeTransport::new(address.clone()));
        }
        if let Some(directory) = &config.records.directory {
            collaborators.records = Arc::new(JsonDirectoryRecords::new(directory.clone()));
        }
        collaborators
    }
}

pub struct Agent {
    config: AgentConfig,
    credentials: CredentialReport,
    state: StateManager,
    threads: Arc<ThreadManager>,
    shutdown: ShutdownSignal,
    client: CloudSyncClient,
    telemetry: Arc<TelemetryPublisher>,
    scheduler: Arc<ProtocolScheduler>,
    poller: Arc<IcbPoller>,
    display: Arc<DisplayRefresher>,
}

impl Agent {
    pub fn new(config: AgentConfig, collaborators: Collaborators) -> Result<Self> {
        config.validate()?;
        let credentials = credentials::check(&config.credentials)?;

        let registry = Arc::new(Registry::new());
        let device = Device::new(config.cloud.device_id.clone(), config.cloud.device_name.clone());
        let state = StateManager::new(Arc::clone(&registry), device, config.limits)?;
        let threads = Arc::new(ThreadManager::new());
        let shutdown = ShutdownSignal::new();

        attach_actuators(&state, Arc::clone(&collaborators.hardware));
        attach_records(&state, collaborators.records);
        attach_capture(
            &state,
            Arc::clone(&collaborators.camera),
            Arc::clone(&collaborators.frames),
        );
        let display = Arc::new(DisplayRefresher::new(
            state.clone(),
            collaborators.display,
            config.display_refresh(),
        ));

        let client = CloudSyncClient::new(
            collaborators.transport,
            Topics::new(&config.cloud.topics, &config.cloud.device_id),
            state.clone(),
            Arc::clone(&threads),
            config.client_settings(),
            shutdown.clone(),
        );
        let telemetry = Arc::new(TelemetryPublisher::new(
            client.clone(),
            state.clone(),
            config.telemetry_settings(),
        ));
        let scheduler = Arc::new(ProtocolScheduler::new(state.clone(), config.scheduler_settings()));
        let poller = Arc::new(IcbPoller::new(
            collaborators.hardware,
            state.clone(),
            config.hardware_poll_interval(),
        ));

        if credentials.needs_attention() {
            registry.status(SystemStatus::new(
                "hardware",
                StatusLevel::Warning,
                "Control board credential missing",
            ));
        }

        Ok(Self {
            config,
            credentials,
            state,
            threads,
            shutdown,
            client,
            telemetry,
            scheduler,
            poller,
            display,
        })
    }

    /// Start every worker thread
    pub fn start(&self) -> Result<()> {
        self.config.log_summary();

        self.client.start()?;

        let telemetry = Arc::clone(&self.telemetry);
        let shutdown = self.shutdown.clone();
        self.threads
            .threaded(false)
            .set_name("telemetry")
            .spawn(move || telemetry.run(&shutdown))?;

        self.scheduler.start(&self.threads, self.shutdown.clone())?;
        self.poller.start(&self.threads, self.shutdown.clone())?;
        self.display.start(&self.threads, self.shutdown.clone())?;

        tracing::info!("Agent started with {} worker threads", self.threads.pending());
        Ok(())
    }

    /// Block until [`shutdown`](Self::shutdown) is requested from another thread
    pub fn wait(&self) {
        while !self.shutdown.wait_timeout(std::time::Duration::from_secs(3600)) {}
    }

    /// Stop every loop and join the worker threads
    pub fn shutdown(&self) -> usize {
        tracing::info!("Agent shutting down");
        self.shutdown.trigger();
        self.client.shutdown();
        let joined = self.threads.join_all();
        tracing::info!("Agent stopped ({} threads joined)", joined);
        joined
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    pub fn client(&self) -> &CloudSyncClient {
        &self.client
    }

    pub fn credentials(&self) -> &CredentialReport {
        &self.credentials
    }

    pub fn display(&self) -> &DisplayRefresher {
        &self.display
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }
}

//! Local display collaborator
//!
//! The display is a read-only consumer: it renders a [`StatusView`] built from
//! snapshots whenever a watched model commits or a status line arrives, and
//! never opens a write transaction.

use crate::error::Result;
use chrono::{DateTime, Utc};
use incubator_state::models::{Device, Experiment, Icb, Readings};
use incubator_state::{EventArgs, EventName, StateManager, SystemStatus};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thread_manager::{ShutdownSignal, ThreadManager};

/// Everything the display shows
#[derive(Debug, Clone, PartialEq)]
pub struct StatusView {
    pub device_name: String,
    pub connected: bool,
    pub registered: bool,
    /// `None` until the board has reported
    pub readings: Option<Readings>,
    pub tp: f64,
    pub cp: f64,
    pub op: f64,
    pub experiment: Option<String>,
    pub elapsed: Option<Duration>,
    pub status: Option<SystemStatus>,
}

impl StatusView {
    pub fn capture(state: &StateManager, status: Option<SystemStatus>, now: DateTime<Utc>) -> Result<Self> {
        let device = state.snapshot::<Device>()?;
        let icb = state.snapshot::<Icb>()?;
        let experiment = state.snapshot::<Experiment>()?;

        Ok(Self {
            device_name: device.name.clone().unwrap_or_default(),
            connected: device.is_connected(),
            registered: device.registered(),
            readings: icb.initialized.then_some(icb.readings),
            tp: icb.tp.value,
            cp: icb.cp.value,
            op: icb.op.value,
            experiment: experiment.active_id().map(str::to_string),
            elapsed: experiment.elapsed(now),
            status,
        })
    }

    /// Text rendering, one line per row of the panel
    pub fn lines(&self) -> Vec<String> {
        let link = match (self.connected, self.registered) {
            (true, true) => "online",
            (true, false) => "online (unregistered)",
            (false, _) => "offline",
        };
        let mut lines = vec![format!("{} [{}]", self.device_name, link)];

        match &self.readings {
            Some(r) => lines.push(format!(
                "T {:.1}/{:.1}C  CO2 {:.1}/{:.1}%  O2 {:.1}/{:.1}%  RH {:.0}%",
                r.tc, self.tp, r.cc, self.cp, r.oc, self.op, r.rh
            )),
            None => lines.push("Waiting for control board".to_string()),
        }

        if let Some(id) = &self.experiment {
            let minutes = self.elapsed.unwrap_or_default().as_secs() / 60;
            lines.push(format!("Experiment {} ({}h{:02}m)", id, minutes / 60, minutes % 60));
        }
        if let Some(status) = &self.status {
            lines.push(format!("{:?}: {}", status.level, status.message));
        }
        lines
    }
}

pub trait StatusDisplay: Send + Sync {
    fn render(&self, view: &StatusView);
}

/// Renders to the log at info level
pub struct LogDisplay;

impl StatusDisplay for LogDisplay {
    fn render(&self, view: &StatusView) {
        for line in view.lines() {
            tracing::info!(target: "display", "{}", line);
        }
    }
}

pub struct DisplayRefresher {
    state: StateManager,
    display: Arc<dyn StatusDisplay>,
    interval: Duration,
    last_status: Arc<Mutex<Option<SystemStatus>>>,
}

impl DisplayRefresher {
    /// Create the refresher and subscribe it to status lines
    pub fn new(state: StateManager, display: Arc<dyn StatusDisplay>, interval: Duration) -> Self {
        let last_status = Arc::new(Mutex::new(None));
        let store = Arc::clone(&last_status);
        state
            .registry()
            .register(EventName::SystemStatusChanged, 0, move |args| {
                if let EventArgs::Status(status) = args {
                    *store.lock() = Some(status.clone());
                }
                Ok(())
            });

        Self {
            state,
            display,
            interval,
            last_status,
        }
    }

    pub fn last_status(&self) -> Option<SystemStatus> {
        self.last_status.lock().clone()
    }

    pub fn refresh(&self, now: DateTime<Utc>) -> Result<StatusView> {
        let view = StatusView::capture(&self.state, self.last_status(), now)?;
        self.display.render(&view);
        Ok(view)
    }

    /// Re-render on every commit notification, at least once per interval
    pub fn run(&self, shutdown: &ShutdownSignal) {
        self.state.watch_all();
        let changes = self.state.changes();

        while !shutdown.is_triggered() {
            if changes.recv_timeout(self.interval).is_some() {
                // Coalesce bursts into one render
                let burst = changes.try_iter().count();
                tracing::trace!("Display refresh after {} commits", burst + 1);
            }
            if let Err(e) = self.refresh(Utc::now()) {
                tracing::warn!("Display refresh failed: {}", e);
            }
        }
    }

    pub fn start(self: &Arc<Self>, threads: &ThreadManager, shutdown: ShutdownSignal) -> Result<()> {
        let refresher = Arc::clone(self);
        threads
            .threaded(false)
            .set_name("display")
            .spawn(move || refresher.run(&shutdown))?;
        Ok(())
    }
}

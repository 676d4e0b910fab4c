//! Protocol scheduler
//!
//! A tick never remembers which step it applied last. It recomputes the
//! current step from the experiment's elapsed time and commits only when the
//! board's setpoints differ, so repeated, missed or restarted ticks converge
//! on the same state.

use crate::error::{Result, SchedulerError};
use chrono::{DateTime, Utc};
use incubator_state::models::{Experiment, Icb, Protocol, ProtocolStep};
use incubator_state::{CaptureKind, CaptureRequest, EventArgs, EventName, StateManager};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use thread_manager::{ShutdownSignal, ThreadManager};

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Time between ticks
    pub tick_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
        }
    }
}

/// What one tick observed and did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickOutcome {
    /// Time since the experiment started; `None` when no experiment is active
    pub elapsed: Option<Duration>,
    /// Index of the protocol step in effect
    pub step: Option<usize>,
    /// Whether this tick committed the step's setpoints
    pub setpoints_applied: bool,
    /// Imaging slot a capture was triggered for during this tick
    pub capture_slot: Option<u64>,
}

impl TickOutcome {
    pub fn idle() -> Self {
        Self::default()
    }
}

/// Index of the latest step whose offset has been reached
///
/// `steps` must be ordered by non-decreasing offset, which protocol
/// validation guarantees. Among steps sharing an offset the last one wins.
pub fn select_step(steps: &[ProtocolStep], elapsed: Duration) -> Option<usize> {
    steps
        .partition_point(|step| step.offset() <= elapsed)
        .checked_sub(1)
}

/// Imaging slot containing `elapsed`
pub fn capture_slot(elapsed: Duration, interval: Duration) -> Option<u64> {
    let interval = interval.as_secs();
    if interval == 0 {
        return None;
    }
    Some(elapsed.as_secs() / interval)
}

pub struct ProtocolScheduler {
    state: StateManager,
    settings: SchedulerSettings,
    /// Experiment id and slot of the last triggered capture
    last_capture: Mutex<Option<(String, u64)>>,
}

impl ProtocolScheduler {
    pub fn new(state: StateManager, settings: SchedulerSettings) -> Self {
        Self {
            state,
            settings,
            last_capture: Mutex::new(None),
        }
    }

    pub fn settings(&self) -> &SchedulerSettings {
        &self.settings
    }

    /// Run [`run`](Self::run) on a named, joinable thread
    pub fn start(
        self: &Arc<Self>,
        threads: &ThreadManager,
        shutdown: ShutdownSignal,
    ) -> Result<()> {
        let scheduler = Arc::clone(self);
        threads
            .threaded(false)
            .set_name("scheduler")
            .spawn(move || scheduler.run(&shutdown))?;
        Ok(())
    }

    /// Tick until shutdown
    pub fn run(&self, shutdown: &ShutdownSignal) {
        tracing::info!("Scheduler started, tick every {:?}", self.settings.tick_interval);
        loop {
            match self.tick(Utc::now()) {
                Ok(outcome) => tracing::trace!("Scheduler tick: {:?}", outcome),
                Err(e) => tracing::warn!("Scheduler tick failed: {}", e),
            }
            if shutdown.wait_timeout(self.settings.tick_interval) {
                break;
            }
        }
        tracing::info!("Scheduler stopped");
    }

    /// Evaluate the protocol at wall time `now`
    pub fn tick(&self, now: DateTime<Utc>) -> Result<TickOutcome> {
        let experiment = self.state.snapshot::<Experiment>()?;
        let (Some(elapsed), Some(experiment_id)) = (experiment.elapsed(now), experiment.active_id())
        else {
            return Ok(TickOutcome::idle());
        };
        let protocol = self.state.snapshot::<Protocol>()?;

        let mut outcome = TickOutcome {
            elapsed: Some(elapsed),
            ..TickOutcome::default()
        };

        if let Some(index) = select_step(&protocol.steps, elapsed) {
            outcome.step = Some(index);
            outcome.setpoints_applied = self.apply_step(index, &protocol.steps[index])?;
        }

        if let Some(slot) = protocol
            .imaging_interval()
            .and_then(|interval| capture_slot(elapsed, interval))
        {
            if self.claim_capture(experiment_id, slot) {
                let request = CaptureRequest {
                    kind: CaptureKind::Experiment,
                    experiment_id: Some(experiment_id.to_string()),
                    slot: Some(slot),
                };
                tracing::debug!(experiment = experiment_id, slot, "Triggering scheduled capture");
                self.state
                    .registry()
                    .trigger(EventName::BeginThumbnailCapture, &EventArgs::Capture(request));
                outcome.capture_slot = Some(slot);
            }
        }

        Ok(outcome)
    }

    /// Commit the step's setpoints if the board differs
    ///
    /// The comparison happens inside the transaction so a concurrent writer
    /// cannot slip in between check and commit.
    fn apply_step(&self, index: usize, step: &ProtocolStep) -> Result<bool> {
        let mut icb = self.state.transaction::<Icb>()?;
        if icb.setpoints_match(step.tp, step.cp, step.op) {
            return Ok(false);
        }

        if let Some(tp) = step.tp {
            icb.tp = tp;
        }
        if let Some(cp) = step.cp {
            icb.cp = cp;
        }
        if let Some(op) = step.op {
            icb.op = op;
        }

        if icb.commit() {
            tracing::info!(step = index, "Applied protocol step setpoints");
            Ok(true)
        } else {
            Err(icb.rejection().cloned().map_or(
                SchedulerError::StepRejectedUnknown { step: index },
                |source| SchedulerError::StepRejected {
                    step: index,
                    source,
                },
            ))
        }
    }

    /// Record `slot` as captured; false if it already was
    fn claim_capture(&self, experiment_id: &str, slot: u64) -> bool {
        let mut last = self.last_capture.lock();
        match &*last {
            Some((id, last_slot)) if id == experiment_id && *last_slot == slot => false,
            _ => {
                *last = Some((experiment_id.to_string(), slot));
                true
            }
        }
    }
}

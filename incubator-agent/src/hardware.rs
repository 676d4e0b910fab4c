//! Control-board collaborator
//!
//! The board is reached only through [`HardwareIo`]. [`IcbPoller`] commits
//! sensor readings into the ICB model; the actuator subscriber installed by
//! [`attach_actuators`] pushes setpoint changes back to the board.

use crate::error::{AgentError, Result};
use chrono::{DateTime, Utc};
use event_bus::SubscriptionId;
use incubator_state::models::{Icb, Readings};
use incubator_state::{EventName, StateManager};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thread_manager::{ShutdownSignal, ThreadManager};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sensor {
    Temperature,
    Co2,
    O2,
    Humidity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Actuator {
    Temperature,
    Co2,
    O2,
}

#[derive(Debug, thiserror::Error)]
pub enum HardwareError {
    #[error("Sensor {0:?} did not respond")]
    SensorUnavailable(Sensor),

    #[error("Actuator {actuator:?} rejected {value}")]
    Rejected { actuator: Actuator, value: f64 },

    #[error("Board I/O failed: {0}")]
    Io(String),
}

/// Low-level read/write primitives of the control board
pub trait HardwareIo: Send + Sync {
    fn read(&self, sensor: Sensor) -> std::result::Result<f64, HardwareError>;
    fn write(&self, actuator: Actuator, value: f64) -> std::result::Result<(), HardwareError>;
}

struct Simulation {
    readings: HashMap<Sensor, f64>,
    targets: HashMap<Actuator, f64>,
    written: Vec<(Actuator, f64)>,
    failing: Option<Sensor>,
}

/// In-process board for local runs and tests
///
/// Each read moves the controlled readings a fifth of the way toward the last
/// written target.
pub struct SimulatedBoard {
    sim: Mutex<Simulation>,
}

impl SimulatedBoard {
    pub fn new() -> Self {
        Self {
            sim: Mutex::new(Simulation {
                readings: HashMap::from([
                    (Sensor::Temperature, 25.0),
                    (Sensor::Co2, 0.04),
                    (Sensor::O2, 20.9),
                    (Sensor::Humidity, 85.0),
                ]),
                targets: HashMap::new(),
                written: Vec::new(),
                failing: None,
            }),
        }
    }

    pub fn set_reading(&self, sensor: Sensor, value: f64) {
        self.sim.lock().readings.insert(sensor, value);
    }

    /// Make reads of `sensor` fail until cleared with `None`
    pub fn set_failing(&self, sensor: Option<Sensor>) {
        self.sim.lock().failing = sensor;
    }

    /// Every write so far, oldest first
    pub fn written(&self) -> Vec<(Actuator, f64)> {
        self.sim.lock().written.clone()
    }

    pub fn target(&self, actuator: Actuator) -> Option<f64> {
        self.sim.lock().targets.get(&actuator).copied()
    }
}

impl Default for SimulatedBoard {
    fn default() -> Self {
        Self::new()
    }
}

fn controlled_by(sensor: Sensor) -> Option<Actuator> {
    match sensor {
        Sensor::Temperature => Some(Actuator::Temperature),
        Sensor::Co2 => Some(Actuator::Co2),
        Sensor::O2 => Some(Actuator::O2),
        Sensor::Humidity => None,
    }
}

impl HardwareIo for SimulatedBoard {
    fn read(&self, sensor: Sensor) -> std::result::Result<f64, HardwareError> {
        let mut sim = self.sim.lock();
        if sim.failing == Some(sensor) {
            return Err(HardwareError::SensorUnavailable(sensor));
        }

        let current = sim.readings.get(&sensor).copied().unwrap_or_default();
        let next = match controlled_by(sensor).and_then(|a| sim.targets.get(&a).copied()) {
            Some(target) => current + (target - current) * 0.2,
            None => current,
        };
        sim.readings.insert(sensor, next);
        Ok(next)
    }

    fn write(&self, actuator: Actuator, value: f64) -> std::result::Result<(), HardwareError> {
        if !value.is_finite() {
            return Err(HardwareError::Rejected { actuator, value });
        }
        let mut sim = self.sim.lock();
        sim.targets.insert(actuator, value);
        sim.written.push((actuator, value));
        Ok(())
    }
}

/// Periodically commits board readings into the ICB model
pub struct IcbPoller {
    io: Arc<dyn HardwareIo>,
    state: StateManager,
    interval: Duration,
}

impl IcbPoller {
    pub fn new(io: Arc<dyn HardwareIo>, state: StateManager, interval: Duration) -> Self {
        Self {
            io,
            state,
            interval,
        }
    }

    /// Read every sensor and commit one sample stamped `now`
    ///
    /// Sensor reads happen before the ICB transaction opens.
    pub fn poll_once(&self, now: DateTime<Utc>) -> Result<Readings> {
        let readings = Readings {
            tc: self.io.read(Sensor::Temperature)?,
            cc: self.io.read(Sensor::Co2)?,
            oc: self.io.read(Sensor::O2)?,
            rh: self.io.read(Sensor::Humidity)?,
        };

        let mut icb = self.state.transaction::<Icb>()?;
        icb.record(readings, now);
        if icb.commit() {
            Ok(readings)
        } else {
            Err(icb
                .rejection()
                .cloned()
                .map_or(AgentError::ReadingsRejectedUnknown, AgentError::ReadingsRejected))
        }
    }

    pub fn run(&self, shutdown: &ShutdownSignal) {
        tracing::info!("Control board polling every {:?}", self.interval);
        loop {
            if let Err(e) = self.poll_once(Utc::now()) {
                tracing::warn!("Control board poll failed: {}", e);
            }
            if shutdown.wait_timeout(self.interval) {
                break;
            }
        }
        tracing::info!("Control board polling stopped");
    }

    pub fn start(self: &Arc<Self>, threads: &ThreadManager, shutdown: ShutdownSignal) -> Result<()> {
        let poller = Arc::clone(self);
        threads
            .threaded(false)
            .set_name("icb-poller")
            .spawn(move || poller.run(&shutdown))?;
        Ok(())
    }
}

/// Write ICB setpoints to the board whenever they change
///
/// The temperature actuator receives `TP + TO`. Reading-only commits write
/// nothing.
pub fn attach_actuators(state: &StateManager, io: Arc<dyn HardwareIo>) -> SubscriptionId {
    let reader = state.clone();
    let last: Mutex<HashMap<Actuator, f64>> = Mutex::new(HashMap::new());

    state.registry().register(EventName::IcbChanged, 0, move |_| {
        let icb = reader.snapshot::<Icb>()?;
        let targets = [
            (Actuator::Temperature, icb.tp.value + icb.to),
            (Actuator::Co2, icb.cp.value),
            (Actuator::O2, icb.op.value),
        ];

        let mut last = last.lock();
        for (actuator, value) in targets {
            if last.get(&actuator) == Some(&value) {
                continue;
            }
            io.write(actuator, value)?;
            tracing::debug!("Actuator {:?} set to {}", actuator, value);
            last.insert(actuator, value);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use incubator_state::models::{Device, IcbLimits, Setpoint};
    use incubator_state::Registry;

    fn state() -> StateManager {
        StateManager::new(
            Arc::new(Registry::new()),
            Device::new("dev-1", "Bench A"),
            IcbLimits::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_poll_commits_readings() {
        let state = state();
        let board = Arc::new(SimulatedBoard::new());
        board.set_reading(Sensor::Humidity, 91.0);
        let poller = IcbPoller::new(board, state.clone(), Duration::from_secs(1));

        let readings = poller.poll_once(Utc::now()).unwrap();
        let icb = state.snapshot::<Icb>().unwrap();
        assert!(icb.initialized);
        assert_eq!(icb.readings, readings);
        assert_eq!(icb.readings.rh, 91.0);
    }

    #[test]
    fn test_failed_sensor_leaves_icb_untouched() {
        let state = state();
        let board = Arc::new(SimulatedBoard::new());
        board.set_failing(Some(Sensor::O2));
        let poller = IcbPoller::new(board, state.clone(), Duration::from_secs(1));

        assert!(matches!(
            poller.poll_once(Utc::now()),
            Err(AgentError::Hardware(HardwareError::SensorUnavailable(Sensor::O2)))
        ));
        assert!(!state.snapshot::<Icb>().unwrap().initialized);
    }

    #[test]
    fn test_out_of_range_humidity_rejected() {
        let state = state();
        let board = Arc::new(SimulatedBoard::new());
        board.set_reading(Sensor::Humidity, 140.0);
        let poller = IcbPoller::new(board, state.clone(), Duration::from_secs(1));

        assert!(matches!(
            poller.poll_once(Utc::now()),
            Err(AgentError::ReadingsRejected(_))
        ));
    }

    #[test]
    fn test_setpoint_changes_reach_actuators_once() {
        let state = state();
        let board = Arc::new(SimulatedBoard::new());
        attach_actuators(&state, board.clone());

        state
            .update::<Icb, _>(|icb| {
                icb.tp = Setpoint::new(36.5);
                icb.to = 0.5;
            })
            .unwrap();
        assert_eq!(board.target(Actuator::Temperature), Some(37.0));
        let writes = board.written().len();
        assert_eq!(writes, 3);

        // Readings-only commit writes nothing new
        let poller = IcbPoller::new(board.clone(), state.clone(), Duration::from_secs(1));
        poller.poll_once(Utc::now()).unwrap();
        assert_eq!(board.written().len(), writes);

        state.update::<Icb, _>(|icb| icb.cp = Setpoint::new(6.0)).unwrap();
        assert_eq!(board.written().last(), Some(&(Actuator::Co2, 6.0)));
        assert_eq!(board.written().len(), writes + 1);
    }

    #[test]
    fn test_simulated_board_approaches_target() {
        let board = SimulatedBoard::new();
        board.write(Actuator::Temperature, 37.0).unwrap();
        let first = board.read(Sensor::Temperature).unwrap();
        let second = board.read(Sensor::Temperature).unwrap();
        assert!(first > 25.0 && second > first && second < 37.0);
    }
}

//! Desired-state delta resolution
//!
//! A delta is resolved key by key in a fixed order. Each recognized key is
//! parsed into its typed update and applied in one transaction on the model
//! that owns it. A key that fails to parse or commit leaves one line in the
//! shared [`ErrorBuffer`] and resolution moves on to the next key; unknown
//! keys are ignored.

use crate::error::ResolveError;
use incubator_state::models::{Device, Icb, ImagingProfile, ImagingUpdate, Setpoint};
use incubator_state::{EventArgs, EventName, Model, StateManager};
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::sync::Arc;
use thread_manager::{ThreadManager, DELTA_LOCK};

/// Keys a delta may carry, in resolution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeltaKey {
    Token,
    Tp,
    Op,
    Cp,
    RefreshDevice,
    RefreshExperiment,
    RefreshProtocol,
    Imaging,
}

impl DeltaKey {
    pub const ORDER: [DeltaKey; 8] = [
        DeltaKey::Token,
        DeltaKey::Tp,
        DeltaKey::Op,
        DeltaKey::Cp,
        DeltaKey::RefreshDevice,
        DeltaKey::RefreshExperiment,
        DeltaKey::RefreshProtocol,
        DeltaKey::Imaging,
    ];

    /// Key as it appears in the delta document
    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaKey::Token => "token",
            DeltaKey::Tp => "TP",
            DeltaKey::Op => "OP",
            DeltaKey::Cp => "CP",
            DeltaKey::RefreshDevice => "refresh_device",
            DeltaKey::RefreshExperiment => "refresh_experiment",
            DeltaKey::RefreshProtocol => "refresh_protocol",
            DeltaKey::Imaging => "imaging",
        }
    }
}

impl std::fmt::Display for DeltaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resolution failures awaiting the next full telemetry publish
#[derive(Debug, Clone, Default)]
pub struct ErrorBuffer {
    lines: Arc<Mutex<Vec<String>>>,
}

impl ErrorBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, line: impl Into<String>) {
        self.lines.lock().push(line.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.lines.lock().clone()
    }

    pub fn clear(&self) {
        self.lines.lock().clear();
    }

    /// Remove the oldest `count` lines once they have been reported
    pub fn acknowledge(&self, count: usize) {
        let mut lines = self.lines.lock();
        let count = count.min(lines.len());
        lines.drain(..count);
    }

    pub fn len(&self) -> usize {
        self.lines.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.lock().is_empty()
    }
}

/// Outcome of one delta
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResolveReport {
    /// Keys whose update was committed (or whose refresh was triggered)
    pub applied: Vec<DeltaKey>,
    /// Keys that produced an error line
    pub failed: Vec<DeltaKey>,
}

impl ResolveReport {
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Applies deltas to the state manager
#[derive(Clone)]
pub struct DeltaResolver {
    state: StateManager,
    threads: Arc<ThreadManager>,
    errors: ErrorBuffer,
}

impl DeltaResolver {
    pub fn new(state: StateManager, threads: Arc<ThreadManager>, errors: ErrorBuffer) -> Self {
        Self {
            state,
            threads,
            errors,
        }
    }

    pub fn errors(&self) -> &ErrorBuffer {
        &self.errors
    }

    /// Resolve every recognized key of `delta`
    ///
    /// Holds the `cloud-delta` lock for the whole resolution so concurrent
    /// deltas apply one after another.
    pub fn resolve(&self, request_id: &str, delta: &Map<String, Value>) -> ResolveReport {
        self.threads.with_lock(DELTA_LOCK, || {
            let mut report = ResolveReport::default();

            for key in DeltaKey::ORDER {
                let Some(value) = delta.get(key.as_str()) else {
                    continue;
                };

                match self.apply(key, value) {
                    Ok(()) => {
                        tracing::debug!(req = request_id, key = %key, "Delta key resolved");
                        report.applied.push(key);
                    }
                    Err(e) => {
                        tracing::warn!(req = request_id, key = %key, "Failed to resolve delta key: {}", e);
                        self.errors
                            .push(format!("REQ:{request_id}: Failed to resolve {key}"));
                        report.failed.push(key);
                    }
                }
            }

            let ignored = delta
                .keys()
                .filter(|k| !DeltaKey::ORDER.iter().any(|key| key.as_str() == k.as_str()))
                .count();
            if ignored > 0 {
                tracing::debug!(req = request_id, "Ignored {} unrecognized delta keys", ignored);
            }

            report
        })
    }

    fn apply(&self, key: DeltaKey, value: &Value) -> Result<(), ResolveError> {
        match key {
            DeltaKey::Token => {
                let token: String = serde_json::from_value(value.clone())?;
                self.commit::<Device>(|device| device.token = Some(token))
            }
            DeltaKey::Tp => {
                let setpoint: Setpoint = serde_json::from_value(value.clone())?;
                self.commit::<Icb>(|icb| icb.tp = setpoint)
            }
            DeltaKey::Op => {
                let setpoint: Setpoint = serde_json::from_value(value.clone())?;
                self.commit::<Icb>(|icb| icb.op = setpoint)
            }
            DeltaKey::Cp => {
                let setpoint: Setpoint = serde_json::from_value(value.clone())?;
                self.commit::<Icb>(|icb| icb.cp = setpoint)
            }
            DeltaKey::RefreshDevice => self.refresh(value, EventName::NewDevice),
            DeltaKey::RefreshExperiment => self.refresh(value, EventName::NewExperiment),
            DeltaKey::RefreshProtocol => self.refresh(value, EventName::NewProtocol),
            DeltaKey::Imaging => {
                let update: ImagingUpdate = serde_json::from_value(value.clone())?;
                self.commit::<ImagingProfile>(|profile| profile.apply(&update))
            }
        }
    }

    fn commit<M: Model>(&self, f: impl FnOnce(&mut M)) -> Result<(), ResolveError> {
        let mut tx = self.state.transaction::<M>()?;
        f(&mut tx);
        if tx.commit() {
            Ok(())
        } else {
            Err(tx
                .rejection()
                .cloned()
                .map_or(ResolveError::RejectedUnknown, ResolveError::Rejected))
        }
    }

    fn refresh(&self, value: &Value, event: EventName) -> Result<(), ResolveError> {
        let requested: bool = serde_json::from_value(value.clone())?;
        if requested {
            self.state.registry().trigger(event, &EventArgs::None);
        }
        Ok(())
    }
}

//! Periodic telemetry publishing
//!
//! Every period the publisher sends a `{"tele_test": <epoch>}` heartbeat.
//! Once the control board has reported readings it also sends the full
//! [`TelemetryDocument`], repeated on the experiment topic while an experiment
//! is running. A full publish drains the delta error buffer into the
//! document's `errors` field.

use crate::client::CloudSyncClient;
use crate::error::Result;
use chrono::{DateTime, Utc};
use incubator_state::models::{Experiment, Icb, ImagingProfile, Setpoint};
use incubator_state::{Model, StateManager};
use parking_lot::Mutex;
use serde::Serialize;
use std::time::{Duration, Instant};
use thread_manager::ShutdownSignal;

/// Telemetry timing
#[derive(Debug, Clone)]
pub struct TelemetrySettings {
    pub period: Duration,
    /// Minimum spacing of long-retention points
    pub long_interval: Duration,
    /// Lifetime of ordinary points
    pub ttl: Duration,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(5),
            long_interval: Duration::from_secs(15 * 60),
            ttl: Duration::from_secs(120),
        }
    }
}

/// Retention class of a telemetry point
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointType {
    Short = 0,
    Long = 1,
}

impl Serialize for PointType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentReport {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// State echoed back to the device shadow
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reported {
    #[serde(rename = "TP")]
    pub tp: Setpoint,
    #[serde(rename = "CP")]
    pub cp: Setpoint,
    #[serde(rename = "OP")]
    pub op: Setpoint,
    #[serde(rename = "TO")]
    pub to: f64,
    pub imaging: ImagingProfile,
    pub experiment: ExperimentReport,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShadowState {
    pub reported: Reported,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Shadow {
    pub state: ShadowState,
}

/// Full outbound telemetry document
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TelemetryDocument {
    #[serde(rename = "TC")]
    pub tc: f64,
    #[serde(rename = "CC")]
    pub cc: f64,
    #[serde(rename = "OC")]
    pub oc: f64,
    #[serde(rename = "RH")]
    pub rh: f64,
    #[serde(rename = "TP")]
    pub tp: f64,
    #[serde(rename = "CP")]
    pub cp: f64,
    #[serde(rename = "OP")]
    pub op: f64,
    #[serde(rename = "TO")]
    pub to: f64,
    /// Epoch seconds
    pub time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp_id: Option<String>,
    /// Epoch seconds after which the point may be discarded; 0 keeps it
    pub ttl: i64,
    pub point_type: PointType,
    pub shadow: Shadow,
    pub errors: Vec<String>,
}

impl TelemetryDocument {
    pub fn build(
        icb: &Icb,
        experiment: &Experiment,
        imaging: &ImagingProfile,
        errors: Vec<String>,
        time: i64,
        point_type: PointType,
        ttl: i64,
    ) -> Self {
        Self {
            tc: icb.readings.tc,
            cc: icb.readings.cc,
            oc: icb.readings.oc,
            rh: icb.readings.rh,
            tp: icb.tp.value,
            cp: icb.cp.value,
            op: icb.op.value,
            to: icb.to,
            time,
            exp_id: None,
            ttl,
            point_type,
            shadow: Shadow {
                state: ShadowState {
                    reported: Reported {
                        tp: icb.tp,
                        cp: icb.cp,
                        op: icb.op,
                        to: icb.to,
                        imaging: imaging.clone(),
                        experiment: ExperimentReport {
                            active: experiment.active,
                            id: experiment.active_id().map(str::to_string),
                        },
                    },
                },
            },
            errors,
        }
    }
}

/// What one telemetry round published
#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryOutcome {
    /// Only the heartbeat; the board has not reported yet
    Heartbeat,
    /// Heartbeat and full document
    Full {
        point_type: PointType,
        experiment: Option<String>,
    },
}

pub struct TelemetryPublisher {
    client: CloudSyncClient,
    state: StateManager,
    settings: TelemetrySettings,
    last_long: Mutex<Option<Instant>>,
}

impl TelemetryPublisher {
    pub fn new(client: CloudSyncClient, state: StateManager, settings: TelemetrySettings) -> Self {
        Self {
            client,
            state,
            settings,
            last_long: Mutex::new(None),
        }
    }

    /// Publish until shutdown, once per period
    pub fn run(&self, shutdown: &ShutdownSignal) {
        tracing::info!("Telemetry started, period {:?}", self.settings.period);
        loop {
            match self.publish_once(Utc::now(), Instant::now()) {
                Ok(outcome) => tracing::trace!("Telemetry published: {:?}", outcome),
                Err(e) => tracing::debug!("Telemetry skipped: {}", e),
            }
            if shutdown.wait_timeout(self.settings.period) {
                break;
            }
        }
        tracing::info!("Telemetry stopped");
    }

    /// One telemetry round at wall time `now` and monotonic time `tick`
    pub fn publish_once(&self, now: DateTime<Utc>, tick: Instant) -> Result<TelemetryOutcome> {
        let icb = self.read::<Icb>()?;
        let experiment = self.read::<Experiment>()?;
        let imaging = self.read::<ImagingProfile>()?;

        let epoch = now.timestamp();
        let topics = self.client.topics();
        self.client
            .publish(&topics.telemetry, &serde_json::json!({ "tele_test": epoch }).to_string())?;

        if !icb.initialized {
            return Ok(TelemetryOutcome::Heartbeat);
        }

        let long = self.long_point_due(tick);
        let (point_type, ttl) = if long {
            (PointType::Long, 0)
        } else {
            (PointType::Short, epoch + self.settings.ttl.as_secs() as i64)
        };

        let errors = self.client.errors();
        let reported = errors.snapshot();
        let reported_count = reported.len();
        let mut document = TelemetryDocument::build(
            &icb,
            &experiment,
            &imaging,
            reported,
            epoch,
            point_type,
            ttl,
        );
        self.client
            .publish(&topics.telemetry, &serde_json::to_string(&document)?)?;

        // The lines went out with the device document
        if long {
            *self.last_long.lock() = Some(tick);
        }
        errors.acknowledge(reported_count);

        let experiment_id = experiment.active_id().map(str::to_string);
        if let Some(id) = &experiment_id {
            document.exp_id = Some(id.clone());
            let topic = topics.experiment(id);
            if let Err(e) = self.client.publish(&topic, &serde_json::to_string(&document)?) {
                tracing::warn!("Failed to publish experiment telemetry on {}: {}", topic, e);
            }
        }

        Ok(TelemetryOutcome::Full {
            point_type,
            experiment: experiment_id,
        })
    }

    /// Copy a model out of a short transaction
    fn read<M: Model>(&self) -> Result<M> {
        let tx = self.state.transaction::<M>()?;
        Ok(M::clone(&tx))
    }

    fn long_point_due(&self, tick: Instant) -> bool {
        match *self.last_long.lock() {
            None => true,
            Some(last) => tick.saturating_duration_since(last) >= self.settings.long_interval,
        }
    }
}

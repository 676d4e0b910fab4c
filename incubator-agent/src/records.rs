//! Experiment, protocol and device records
//!
//! The cloud only signals that a record changed (*new experiment*, *new
//! protocol*, *new device*, *renew credentials*); [`attach_records`] answers
//! each signal by pulling the current record from a [`RecordSource`] and
//! committing it through a state transaction. A source with nothing to offer
//! returns `None` and the model is left alone.

use event_bus::{HandlerError, SubscriptionId};
use incubator_state::models::{Device, Experiment, Protocol};
use incubator_state::{EventName, Model, StateManager};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const EXPERIMENT_FILE: &str = "experiment.json";
pub const PROTOCOL_FILE: &str = "protocol.json";
pub const DEVICE_FILE: &str = "device.json";

#[derive(Debug, thiserror::Error)]
pub enum RecordError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed record {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Record source unavailable: {0}")]
    Unavailable(String),
}

/// Device fields the cloud may hand out
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceRecord {
    pub name: Option<String>,
    /// Fresh credential token
    pub token: Option<String>,
}

/// Where refreshed records come from
pub trait RecordSource: Send + Sync {
    fn fetch_experiment(&self) -> Result<Option<Experiment>, RecordError>;
    fn fetch_protocol(&self) -> Result<Option<Protocol>, RecordError>;
    fn fetch_device(&self) -> Result<Option<DeviceRecord>, RecordError>;

    fn renew_token(&self) -> Result<Option<String>, RecordError> {
        Ok(self.fetch_device()?.and_then(|record| record.token))
    }
}

/// Records held in memory; empty until set
#[derive(Default)]
pub struct MemoryRecords {
    experiment: Mutex<Option<Experiment>>,
    protocol: Mutex<Option<Protocol>>,
    device: Mutex<Option<DeviceRecord>>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_experiment(&self, experiment: Experiment) {
        *self.experiment.lock() = Some(experiment);
    }

    pub fn set_protocol(&self, protocol: Protocol) {
        *self.protocol.lock() = Some(protocol);
    }

    pub fn set_device(&self, device: DeviceRecord) {
        *self.device.lock() = Some(device);
    }
}

impl RecordSource for MemoryRecords {
    fn fetch_experiment(&self) -> Result<Option<Experiment>, RecordError> {
        Ok(self.experiment.lock().clone())
    }

    fn fetch_protocol(&self) -> Result<Option<Protocol>, RecordError> {
        Ok(self.protocol.lock().clone())
    }

    fn fetch_device(&self) -> Result<Option<DeviceRecord>, RecordError> {
        Ok(self.device.lock().clone())
    }
}

/// JSON documents in a directory, re-read on every fetch
///
/// A missing file means "no record"; a file that does not parse is an error.
pub struct JsonDirectoryRecords {
    directory: PathBuf,
}

impl JsonDirectoryRecords {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn read<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<Option<T>, RecordError> {
        let path = self.directory.join(file);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(RecordError::Io { path, source }),
        };
        serde_json::from_str(&text)
            .map(Some)
            .map_err(|source| RecordError::Parse { path, source })
    }
}

impl RecordSource for JsonDirectoryRecords {
    fn fetch_experiment(&self) -> Result<Option<Experiment>, RecordError> {
        self.read(EXPERIMENT_FILE)
    }

    fn fetch_protocol(&self) -> Result<Option<Protocol>, RecordError> {
        self.read(PROTOCOL_FILE)
    }

    fn fetch_device(&self) -> Result<Option<DeviceRecord>, RecordError> {
        self.read(DEVICE_FILE)
    }
}

fn commit<M: Model>(state: &StateManager, f: impl FnOnce(&mut M)) -> Result<(), HandlerError> {
    let mut tx = state.transaction::<M>()?;
    f(&mut tx);
    if tx.commit() {
        Ok(())
    } else {
        Err(match tx.rejection() {
            Some(rejection) => rejection.clone().into(),
            None => format!("{} record rejected", M::KEY).into(),
        })
    }
}

/// Subscribe the record refreshers
///
/// Returns the ids for *new experiment*, *new protocol*, *new device* and
/// *renew credentials*, in that order.
pub fn attach_records(state: &StateManager, source: Arc<dyn RecordSource>) -> [SubscriptionId; 4] {
    let registry = state.registry();

    let (writer, records) = (state.clone(), Arc::clone(&source));
    let experiment = registry.register(EventName::NewExperiment, 0, move |_| {
        if let Some(experiment) = records.fetch_experiment()? {
            tracing::info!("Experiment record refreshed: {:?}", experiment.active_id());
            commit::<Experiment>(&writer, |current| *current = experiment)?;
        }
        Ok(())
    });

    let (writer, records) = (state.clone(), Arc::clone(&source));
    let protocol = registry.register(EventName::NewProtocol, 0, move |_| {
        if let Some(protocol) = records.fetch_protocol()? {
            tracing::info!("Protocol record refreshed ({} steps)", protocol.steps.len());
            commit::<Protocol>(&writer, |current| *current = protocol)?;
        }
        Ok(())
    });

    let (writer, records) = (state.clone(), Arc::clone(&source));
    let device = registry.register(EventName::NewDevice, 0, move |_| {
        if let Some(record) = records.fetch_device()? {
            commit::<Device>(&writer, |device| {
                if record.name.is_some() {
                    device.name = record.name;
                }
                if record.token.is_some() {
                    device.token = record.token;
                }
            })?;
        }
        Ok(())
    });

    let (writer, records) = (state.clone(), source);
    let credentials = registry.register(EventName::RenewCredentials, 0, move |_| {
        if let Some(token) = records.renew_token()? {
            tracing::debug!("Credential token renewed");
            commit::<Device>(&writer, |device| device.token = Some(token))?;
        }
        Ok(())
    });

    [experiment, protocol, device, credentials]
}

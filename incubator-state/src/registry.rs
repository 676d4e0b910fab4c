//! Fixed registry of named event buses
//!
//! Built once at startup and shared as `Arc<Registry>`. The set of events is
//! closed: every [`EventName`] has exactly one bus, and there is no way to add
//! more at runtime.

use event_bus::{EventBus, HandlerResult, SubscriptionId};
use serde::{Deserialize, Serialize};

/// Names of every event the agent publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventName {
    DeviceChanged,
    IcbChanged,
    ExperimentChanged,
    ImagingProfileChanged,
    ProtocolChanged,
    NewDevice,
    NewExperiment,
    NewProtocol,
    BeginThumbnailCapture,
    BeginPreviewCapture,
    RenewCredentials,
    SystemStatusChanged,
}

impl EventName {
    pub const ALL: [EventName; 12] = [
        EventName::DeviceChanged,
        EventName::IcbChanged,
        EventName::ExperimentChanged,
        EventName::ImagingProfileChanged,
        EventName::ProtocolChanged,
        EventName::NewDevice,
        EventName::NewExperiment,
        EventName::NewProtocol,
        EventName::BeginThumbnailCapture,
        EventName::BeginPreviewCapture,
        EventName::RenewCredentials,
        EventName::SystemStatusChanged,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::DeviceChanged => "device changed",
            EventName::IcbChanged => "icb changed",
            EventName::ExperimentChanged => "experiment changed",
            EventName::ImagingProfileChanged => "imaging profile changed",
            EventName::ProtocolChanged => "protocol changed",
            EventName::NewDevice => "new device",
            EventName::NewExperiment => "new experiment",
            EventName::NewProtocol => "new protocol",
            EventName::BeginThumbnailCapture => "begin thumbnail capture",
            EventName::BeginPreviewCapture => "begin preview capture",
            EventName::RenewCredentials => "renew credentials",
            EventName::SystemStatusChanged => "system status changed",
        }
    }

    /// The *changed* event fired when the model with this key commits
    pub fn for_model(model_key: &str) -> Option<EventName> {
        use crate::models::{Device, Experiment, Icb, ImagingProfile, Protocol};
        use state_store::Model;

        match model_key {
            Device::KEY => Some(EventName::DeviceChanged),
            Icb::KEY => Some(EventName::IcbChanged),
            Experiment::KEY => Some(EventName::ExperimentChanged),
            ImagingProfile::KEY => Some(EventName::ImagingProfileChanged),
            Protocol::KEY => Some(EventName::ProtocolChanged),
            _ => None,
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

impl std::fmt::Display for EventName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to capture
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaptureKind {
    /// Scheduled experiment thumbnail
    #[serde(rename = "experiment")]
    Experiment,
    /// Differential phase contrast preview
    #[serde(rename = "dpc-capture")]
    Dpc,
    /// Fluorescence preview
    #[serde(rename = "gfp-capture")]
    Gfp,
}

impl CaptureKind {
    /// Name as it appears in image requests
    pub fn as_str(&self) -> &'static str {
        match self {
            CaptureKind::Experiment => "experiment",
            CaptureKind::Dpc => "dpc-capture",
            CaptureKind::Gfp => "gfp-capture",
        }
    }

    /// The event that starts this kind of capture
    pub fn event(&self) -> EventName {
        match self {
            CaptureKind::Experiment => EventName::BeginThumbnailCapture,
            CaptureKind::Dpc | CaptureKind::Gfp => EventName::BeginPreviewCapture,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRequest {
    pub kind: CaptureKind,
    pub experiment_id: Option<String>,
    /// Imaging slot index for scheduled captures
    pub slot: Option<u64>,
}

impl CaptureRequest {
    pub fn new(kind: CaptureKind) -> Self {
        Self {
            kind,
            experiment_id: None,
            slot: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusLevel {
    Info,
    Warning,
    Error,
}

/// A human-readable status line for the local display
#[derive(Debug, Clone, PartialEq)]
pub struct SystemStatus {
    pub component: String,
    pub level: StatusLevel,
    pub message: String,
}

impl SystemStatus {
    pub fn new(component: impl Into<String>, level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            level,
            message: message.into(),
        }
    }
}

/// Arguments delivered to subscribers
#[derive(Debug, Clone, PartialEq)]
pub enum EventArgs {
    None,
    Capture(CaptureRequest),
    Status(SystemStatus),
}

/// One bus per [`EventName`]
pub struct Registry {
    buses: [EventBus<EventArgs>; 12],
}

impl Registry {
    pub fn new() -> Self {
        Self {
            buses: EventName::ALL.map(|name| EventBus::new(name.as_str())),
        }
    }

    pub fn bus(&self, name: EventName) -> &EventBus<EventArgs> {
        &self.buses[name.index()]
    }

    pub fn register<F>(&self, name: EventName, priority: i32, handler: F) -> SubscriptionId
    where
        F: Fn(&EventArgs) -> HandlerResult + Send + Sync + 'static,
    {
        self.bus(name).register(priority, handler)
    }

    pub fn register_if<P, F>(
        &self,
        name: EventName,
        priority: i32,
        predicate: P,
        handler: F,
    ) -> SubscriptionId
    where
        P: Fn(&EventArgs) -> bool + Send + Sync + 'static,
        F: Fn(&EventArgs) -> HandlerResult + Send + Sync + 'static,
    {
        self.bus(name).register_if(priority, predicate, handler)
    }

    pub fn unregister(&self, name: EventName, id: SubscriptionId) -> bool {
        self.bus(name).unregister(id)
    }

    /// Trigger an event; returns the number of subscribers invoked
    pub fn trigger(&self, name: EventName, args: &EventArgs) -> usize {
        tracing::trace!(event = %name, "Triggering event");
        self.bus(name).trigger(args)
    }

    pub fn status(&self, status: SystemStatus) -> usize {
        self.trigger(EventName::SystemStatusChanged, &EventArgs::Status(status))
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut map = f.debug_map();
        for name in EventName::ALL {
            map.entry(&name.as_str(), &self.bus(name).subscriber_count());
        }
        map.finish()
    }
}

//! Topic names derived from configurable templates

use serde::{Deserialize, Serialize};

/// Topic templates; `{device_id}` and `{experiment_id}` are substituted
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicTemplates {
    /// Inbound desired-state deltas
    pub desired: String,
    /// Inbound image requests
    pub image_request: String,
    /// Outbound device telemetry
    pub telemetry: String,
    /// Outbound telemetry for the running experiment
    pub experiment_telemetry: String,
}

impl Default for TopicTemplates {
    fn default() -> Self {
        Self {
            desired: "devices/{device_id}/shadow/update/delta".into(),
            image_request: "devices/{device_id}/image/request".into(),
            telemetry: "devices/{device_id}/telemetry".into(),
            experiment_telemetry: "experiments/{experiment_id}/devices/{device_id}/telemetry".into(),
        }
    }
}

/// Concrete topics for one device
#[derive(Debug, Clone, PartialEq)]
pub struct Topics {
    pub desired: String,
    pub image_request: String,
    pub telemetry: String,
    device_id: String,
    experiment_template: String,
}

impl Topics {
    pub fn new(templates: &TopicTemplates, device_id: &str) -> Self {
        let fill = |template: &str| template.replace("{device_id}", device_id);
        Self {
            desired: fill(&templates.desired),
            image_request: fill(&templates.image_request),
            telemetry: fill(&templates.telemetry),
            device_id: device_id.to_string(),
            experiment_template: fill(&templates.experiment_telemetry),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Telemetry topic of one experiment
    pub fn experiment(&self, experiment_id: &str) -> String {
        self.experiment_template.replace("{experiment_id}", experiment_id)
    }

    /// Topics the client subscribes to once connected
    pub fn inbound(&self) -> [&str; 2] {
        [&self.desired, &self.image_request]
    }
}

use super::setpoint::Setpoint;
use serde::{Deserialize, Serialize};
use state_store::{Model, ValidationError};
use std::time::Duration;

/// One time-scheduled change of setpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtocolStep {
    /// Seconds after experiment start at which the step takes effect
    pub offset_secs: u64,
    #[serde(default)]
    pub tp: Option<Setpoint>,
    #[serde(default)]
    pub cp: Option<Setpoint>,
    #[serde(default)]
    pub op: Option<Setpoint>,
}

impl ProtocolStep {
    pub fn offset(&self) -> Duration {
        Duration::from_secs(self.offset_secs)
    }
}

/// Setpoint schedule for the running experiment
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Protocol {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub steps: Vec<ProtocolStep>,
    /// Seconds between thumbnail captures
    #[serde(default)]
    pub imaging_interval_secs: Option<u64>,
}

impl Protocol {
    pub fn imaging_interval(&self) -> Option<Duration> {
        self.imaging_interval_secs.map(Duration::from_secs)
    }
}

impl Model for Protocol {
    const KEY: &'static str = "protocol";

    fn validate(&mut self, _previous: Option<&Self>) -> Result<(), ValidationError> {
        if let Some(i) = self
            .steps
            .windows(2)
            .position(|w| w[1].offset_secs < w[0].offset_secs)
        {
            return Err(ValidationError::new(
                Self::KEY,
                format!("steps[{}].offset_secs", i + 1),
                "step offsets must be non-decreasing",
            ));
        }

        for (i, step) in self.steps.iter().enumerate() {
            for (name, setpoint) in [("tp", step.tp), ("cp", step.cp), ("op", step.op)] {
                if let Some(setpoint) = setpoint {
                    setpoint.check(Self::KEY, &format!("steps[{i}].{name}"))?;
                }
            }
        }

        if self.imaging_interval_secs == Some(0) {
            return Err(ValidationError::new(Self::KEY, "imaging_interval_secs", "must be positive"));
        }
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_store::{Model, ValidationError};
use std::time::Duration;

/// The experiment currently running in the incubator, if any
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Experiment {
    pub active: bool,
    pub id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl Experiment {
    pub fn start(&mut self, id: impl Into<String>, at: DateTime<Utc>) {
        self.active = true;
        self.id = Some(id.into());
        self.started_at = Some(at);
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.id = None;
        self.started_at = None;
    }

    /// Id of the running experiment
    pub fn active_id(&self) -> Option<&str> {
        if self.active {
            self.id.as_deref()
        } else {
            None
        }
    }

    /// Time since the experiment started, clamped at zero
    ///
    /// `None` when no experiment is active.
    pub fn elapsed(&self, now: DateTime<Utc>) -> Option<Duration> {
        if !self.active {
            return None;
        }
        let started = self.started_at?;
        Some((now - started).to_std().unwrap_or(Duration::ZERO))
    }
}

impl Model for Experiment {
    const KEY: &'static str = "experiment";

    fn validate(&mut self, _previous: Option<&Self>) -> Result<(), ValidationError> {
        if self.active {
            if self.id.as_deref().map_or(true, str::is_empty) {
                return Err(ValidationError::new(Self::KEY, "id", "active experiment needs an id"));
            }
            if self.started_at.is_none() {
                return Err(ValidationError::new(
                    Self::KEY,
                    "started_at",
                    "active experiment needs a start time",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_requires_id_and_start() {
        let mut exp = Experiment {
            active: true,
            ..Default::default()
        };
        assert_eq!(exp.validate(None).unwrap_err().field, "id");

        exp.id = Some("exp-1".into());
        assert_eq!(exp.validate(None).unwrap_err().field, "started_at");

        exp.started_at = Some(Utc::now());
        assert!(exp.validate(None).is_ok());
    }

    #[test]
    fn test_elapsed() {
        let start = Utc::now();
        let mut exp = Experiment::default();
        assert_eq!(exp.elapsed(start), None);

        exp.start("exp-1", start);
        assert_eq!(
            exp.elapsed(start + chrono::Duration::seconds(90)),
            Some(Duration::from_secs(90))
        );
        // Clock skew before the start time clamps to zero
        assert_eq!(exp.elapsed(start - chrono::Duration::seconds(5)), Some(Duration::ZERO));
    }

    #[test]
    fn test_stop_clears_id() {
        let mut exp = Experiment::default();
        exp.start("exp-1", Utc::now());
        assert_eq!(exp.active_id(), Some("exp-1"));
        exp.stop();
        assert_eq!(exp.active_id(), None);
        assert!(exp.validate(None).is_ok());
    }
}

//! Incubator control board (ICB) model

use super::setpoint::{IcbLimits, Setpoint};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use state_store::{Model, ValidationError};

/// One sample of the board's sensors
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Readings {
    /// Chamber temperature, °C
    pub tc: f64,
    /// CO2, %
    pub cc: f64,
    /// O2, %
    pub oc: f64,
    /// Relative humidity, %
    pub rh: f64,
}

/// Environment readings and control setpoints of the incubator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Icb {
    pub readings: Readings,
    /// Temperature setpoint
    pub tp: Setpoint,
    /// CO2 setpoint
    pub cp: Setpoint,
    /// O2 setpoint
    pub op: Setpoint,
    /// Temperature sensor offset, °C
    pub to: f64,
    /// Time of the last readings sample
    pub updated_at: Option<DateTime<Utc>>,
    /// Set once the first readings sample has been committed
    pub initialized: bool,
    #[serde(skip)]
    pub limits: IcbLimits,
}

impl Icb {
    pub fn new(limits: IcbLimits) -> Self {
        Self {
            readings: Readings::default(),
            tp: Setpoint::new(37.0),
            cp: Setpoint::new(5.0),
            op: Setpoint::new(21.0),
            to: 0.0,
            updated_at: None,
            initialized: false,
            limits,
        }
    }

    /// Store a sensor sample taken at `at`
    pub fn record(&mut self, readings: Readings, at: DateTime<Utc>) {
        self.readings = readings;
        self.updated_at = Some(at);
        self.initialized = true;
    }

    /// Whether the setpoints already equal the given ones
    ///
    /// `None` means "leave as is" and always matches.
    pub fn setpoints_match(
        &self,
        tp: Option<Setpoint>,
        cp: Option<Setpoint>,
        op: Option<Setpoint>,
    ) -> bool {
        tp.map_or(true, |s| s == self.tp)
            && cp.map_or(true, |s| s == self.cp)
            && op.map_or(true, |s| s == self.op)
    }
}

impl Default for Icb {
    fn default() -> Self {
        Self::new(IcbLimits::default())
    }
}

impl Model for Icb {
    const KEY: &'static str = "icb";

    fn validate(&mut self, previous: Option<&Self>) -> Result<(), ValidationError> {
        self.limits.check()?;
        self.tp.check_within(Self::KEY, "tp", self.limits.tp)?;
        self.cp.check_within(Self::KEY, "cp", self.limits.cp)?;
        self.op.check_within(Self::KEY, "op", self.limits.op)?;

        if !self.to.is_finite() {
            return Err(ValidationError::new(Self::KEY, "to", "offset is not finite"));
        }

        let r = &self.readings;
        for (field, value) in [("tc", r.tc), ("cc", r.cc), ("oc", r.oc)] {
            if !value.is_finite() {
                return Err(ValidationError::new(Self::KEY, field, "reading is not finite"));
            }
        }
        ValidationError::check_range(Self::KEY, "rh", r.rh, 0.0, 100.0)?;

        if let (Some(prev), Some(now)) = (previous.and_then(|p| p.updated_at), self.updated_at) {
            if now < prev {
                return Err(ValidationError::new(
                    Self::KEY,
                    "updated_at",
                    format!("sample at {now} precedes last sample at {prev}"),
                ));
            }
        }
        if self.updated_at.is_none() && previous.is_some_and(|p| p.updated_at.is_some()) {
            return Err(ValidationError::new(Self::KEY, "updated_at", "timestamp cleared"));
        }

        Ok(())
    }
}

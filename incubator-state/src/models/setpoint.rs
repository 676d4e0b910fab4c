//! Control setpoints and their bounds

use serde::{Deserialize, Serialize};
use state_store::ValidationError;

/// Target value for one controlled quantity
///
/// Deserializes from either a bare number (`37.0`) or an object
/// (`{"value": 37.0, "ramp_secs": 600}`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "SetpointRepr")]
pub struct Setpoint {
    pub value: f64,
    /// Seconds over which the controller ramps toward `value`
    pub ramp_secs: f64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum SetpointRepr {
    Value(f64),
    Full {
        value: f64,
        #[serde(default)]
        ramp_secs: f64,
    },
}

impl From<SetpointRepr> for Setpoint {
    fn from(repr: SetpointRepr) -> Self {
        match repr {
            SetpointRepr::Value(value) => Setpoint::new(value),
            SetpointRepr::Full { value, ramp_secs } => Setpoint { value, ramp_secs },
        }
    }
}

impl Setpoint {
    /// Immediate setpoint (no ramp)
    pub const fn new(value: f64) -> Self {
        Self {
            value,
            ramp_secs: 0.0,
        }
    }

    pub const fn with_ramp(mut self, ramp_secs: f64) -> Self {
        self.ramp_secs = ramp_secs;
        self
    }

    /// Check the setpoint's own invariant: finite target, non-negative ramp
    pub fn check(&self, model: &'static str, field: &str) -> Result<(), ValidationError> {
        if !self.value.is_finite() {
            return Err(ValidationError::new(model, field, "target is not finite"));
        }
        if !self.ramp_secs.is_finite() || self.ramp_secs < 0.0 {
            return Err(ValidationError::new(
                model,
                field,
                format!("ramp {} must be a non-negative duration", self.ramp_secs),
            ));
        }
        Ok(())
    }

    /// Check the invariant and that the target lies within `bounds`
    pub fn check_within(
        &self,
        model: &'static str,
        field: &str,
        bounds: Bounds,
    ) -> Result<(), ValidationError> {
        self.check(model, field)?;
        ValidationError::check_range(model, field, self.value, bounds.min, bounds.max)
    }
}

/// Closed interval `[min, max]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: f64,
    pub max: f64,
}

impl Bounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f64) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Allowed setpoint ranges for the incubator control board
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IcbLimits {
    /// Temperature, °C
    pub tp: Bounds,
    /// CO2, %
    pub cp: Bounds,
    /// O2, %
    pub op: Bounds,
}

impl Default for IcbLimits {
    fn default() -> Self {
        Self {
            tp: Bounds::new(20.0, 45.0),
            cp: Bounds::new(0.0, 20.0),
            op: Bounds::new(1.0, 21.0),
        }
    }
}

impl IcbLimits {
    /// Ensure every range is well formed
    pub fn check(&self) -> Result<(), ValidationError> {
        for (field, bounds) in [("tp", self.tp), ("cp", self.cp), ("op", self.op)] {
            if !(bounds.min.is_finite() && bounds.max.is_finite()) || bounds.min > bounds.max {
                return Err(ValidationError::new(
                    "icb_limits",
                    field,
                    format!("invalid bounds [{}, {}]", bounds.min, bounds.max),
                ));
            }
        }
        Ok(())
    }
}

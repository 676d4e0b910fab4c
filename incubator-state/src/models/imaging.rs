//! Camera imaging profile

use serde::{Deserialize, Serialize};
use state_store::{Model, ValidationError};

/// A setting together with its permitted range
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounded {
    pub value: f64,
    pub min: f64,
    pub max: f64,
}

impl Bounded {
    pub const fn new(value: f64, min: f64, max: f64) -> Self {
        Self { value, min, max }
    }

    fn check(&self, field: &str) -> Result<(), ValidationError> {
        ValidationError::check_range(ImagingProfile::KEY, field, self.value, self.min, self.max)
    }
}

/// Exposure settings of one imaging channel
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChannelSettings {
    /// Exposure time, ms
    pub exposure: Bounded,
    pub gain: Bounded,
    pub brightness: Bounded,
}

impl ChannelSettings {
    fn check(&self, channel: &str) -> Result<(), ValidationError> {
        self.exposure.check(&format!("{channel}.exposure"))?;
        self.gain.check(&format!("{channel}.gain"))?;
        self.brightness.check(&format!("{channel}.brightness"))
    }

    fn apply(&mut self, update: &ChannelUpdate) {
        if let Some(v) = update.exposure {
            self.exposure.value = v;
        }
        if let Some(v) = update.gain {
            self.gain.value = v;
        }
        if let Some(v) = update.brightness {
            self.brightness.value = v;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImagingProfile {
    /// Phase-contrast (brightfield / DPC) channel
    pub phase: ChannelSettings,
    /// Fluorescence (GFP) channel
    pub fluorescence: ChannelSettings,
    /// DPC aperture radii, pixels
    pub inner_radius: f64,
    pub outer_radius: f64,
}

impl Default for ImagingProfile {
    fn default() -> Self {
        Self {
            phase: ChannelSettings {
                exposure: Bounded::new(10.0, 0.1, 1000.0),
                gain: Bounded::new(1.0, 1.0, 16.0),
                brightness: Bounded::new(0.5, 0.0, 1.0),
            },
            fluorescence: ChannelSettings {
                exposure: Bounded::new(200.0, 1.0, 5000.0),
                gain: Bounded::new(4.0, 1.0, 16.0),
                brightness: Bounded::new(0.8, 0.0, 1.0),
            },
            inner_radius: 0.0,
            outer_radius: 120.0,
        }
    }
}

impl ImagingProfile {
    /// Overwrite the values named in `update`; bounds are left alone
    pub fn apply(&mut self, update: &ImagingUpdate) {
        if let Some(phase) = &update.phase {
            self.phase.apply(phase);
        }
        if let Some(fluorescence) = &update.fluorescence {
            self.fluorescence.apply(fluorescence);
        }
        if let Some(r) = update.inner_radius {
            self.inner_radius = r;
        }
        if let Some(r) = update.outer_radius {
            self.outer_radius = r;
        }
    }
}

impl Model for ImagingProfile {
    const KEY: &'static str = "imaging_profile";

    fn validate(&mut self, _previous: Option<&Self>) -> Result<(), ValidationError> {
        self.phase.check("phase")?;
        self.fluorescence.check("fluorescence")?;

        if !(self.inner_radius.is_finite() && self.inner_radius >= 0.0) {
            return Err(ValidationError::new(Self::KEY, "inner_radius", "must be a non-negative number"));
        }
        if !self.outer_radius.is_finite() || self.inner_radius > self.outer_radius {
            return Err(ValidationError::new(
                Self::KEY,
                "outer_radius",
                format!("inner radius {} exceeds outer radius {}", self.inner_radius, self.outer_radius),
            ));
        }
        Ok(())
    }
}

/// Partial channel update
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelUpdate {
    pub exposure: Option<f64>,
    pub gain: Option<f64>,
    pub brightness: Option<f64>,
}

/// Partial imaging-profile update, as carried by a cloud delta
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImagingUpdate {
    pub phase: Option<ChannelUpdate>,
    pub fluorescence: Option<ChannelUpdate>,
    pub inner_radius: Option<f64>,
    pub outer_radius: Option<f64>,
}

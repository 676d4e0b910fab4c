//! Agent configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `INCUBATOR_`-prefixed environment variables where `__` separates nesting
//! levels (`INCUBATOR_CLOUD__DEVICE_ID=inc-7`).

use cloud_sync::{ClientSettings, TelemetrySettings, TopicTemplates};
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use incubator_scheduler::SchedulerSettings;
use incubator_state::models::IcbLimits;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const ENV_PREFIX: &str = "INCUBATOR_";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),

    #[error("Invalid configuration for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub cloud: CloudConfig,
    pub telemetry: TelemetryConfig,
    pub scheduler: SchedulerConfig,
    pub hardware: HardwareConfig,
    /// Allowed setpoint ranges
    pub limits: IcbLimits,
    pub credentials: CredentialFiles,
    pub records: RecordsConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    /// Required; substituted into every topic template
    pub device_id: String,
    pub device_name: String,
    /// `host:port` of the TCP message bridge; unset runs against the in-memory broker
    pub bridge: Option<String>,
    pub topics: TopicTemplates,
    pub connect_timeout_secs: u64,
    pub retry_delay_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            device_name: "Incubator".into(),
            bridge: None,
            topics: TopicTemplates::default(),
            connect_timeout_secs: 10,
            retry_delay_secs: 5,
            poll_interval_ms: 500,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub period_secs: u64,
    /// Minimum spacing of long-retention points
    pub long_interval_secs: u64,
    pub ttl_secs: u64,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            period_secs: 5,
            long_interval_secs: 15 * 60,
            ttl_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub poll_interval_ms: u64,
    pub display_refresh_ms: u64,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 2000,
            display_refresh_ms: 1000,
        }
    }
}

/// Provisioning files expected in `directory`
///
/// With no directory configured the agent runs unprovisioned and skips the
/// check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialFiles {
    pub directory: Option<PathBuf>,
    pub certificate: String,
    pub private_key: String,
    pub root_ca: String,
    /// Control-board credential; only this one may be missing
    pub hardware: String,
}

impl Default for CredentialFiles {
    fn default() -> Self {
        Self {
            directory: None,
            certificate: "device.pem.crt".into(),
            private_key: "private.pem.key".into(),
            root_ca: "root-ca.pem".into(),
            hardware: "hardware.json".into(),
        }
    }
}

/// Experiment, protocol and device records
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordsConfig {
    /// JSON record directory; unset keeps records in memory
    pub directory: Option<PathBuf>,
}

impl AgentConfig {
    /// Defaults, then `path` if given, then the environment
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(AgentConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load and validate
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::from_figment(Self::figment(path))
    }

    pub fn from_figment(figment: Figment) -> Result<Self, ConfigError> {
        let config: AgentConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let device_id = self.cloud.device_id.trim();
        if device_id.is_empty() {
            return Err(ConfigError::invalid("cloud.device_id", "a device id is required"));
        }
        if device_id.contains(['/', '+', '#']) {
            return Err(ConfigError::invalid(
                "cloud.device_id",
                format!("'{}' contains a topic separator or wildcard", device_id),
            ));
        }

        if let Some(bridge) = &self.cloud.bridge {
            if !bridge.contains(':') {
                return Err(ConfigError::invalid(
                    "cloud.bridge",
                    format!("'{}' is not a host:port address", bridge),
                ));
            }
        }

        if self.cloud.connect_timeout_secs == 0 {
            return Err(ConfigError::invalid("cloud.connect_timeout_secs", "must be greater than 0"));
        }
        if self.cloud.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("cloud.poll_interval_ms", "must be greater than 0"));
        }

        if self.telemetry.period_secs == 0 {
            return Err(ConfigError::invalid("telemetry.period_secs", "must be greater than 0"));
        }
        if self.telemetry.ttl_secs == 0 {
            return Err(ConfigError::invalid("telemetry.ttl_secs", "must be greater than 0"));
        }
        if self.telemetry.long_interval_secs < self.telemetry.period_secs {
            return Err(ConfigError::invalid(
                "telemetry.long_interval_secs",
                "must not be shorter than the telemetry period",
            ));
        }

        if self.scheduler.tick_interval_ms == 0 {
            return Err(ConfigError::invalid("scheduler.tick_interval_ms", "must be greater than 0"));
        }
        if self.hardware.poll_interval_ms == 0 {
            return Err(ConfigError::invalid("hardware.poll_interval_ms", "must be greater than 0"));
        }
        if self.hardware.display_refresh_ms == 0 {
            return Err(ConfigError::invalid("hardware.display_refresh_ms", "must be greater than 0"));
        }

        self.limits
            .check()
            .map_err(|e| ConfigError::invalid("limits", e.to_string()))?;

        Ok(())
    }

    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_secs(self.cloud.connect_timeout_secs),
            retry_delay: Duration::from_secs(self.cloud.retry_delay_secs),
            poll_interval: Duration::from_millis(self.cloud.poll_interval_ms),
        }
    }

    pub fn telemetry_settings(&self) -> TelemetrySettings {
        TelemetrySettings {
            period: Duration::from_secs(self.telemetry.period_secs),
            long_interval: Duration::from_secs(self.telemetry.long_interval_secs),
            ttl: Duration::from_secs(self.telemetry.ttl_secs),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            tick_interval: Duration::from_millis(self.scheduler.tick_interval_ms),
        }
    }

    pub fn hardware_poll_interval(&self) -> Duration {
        Duration::from_millis(self.hardware.poll_interval_ms)
    }

    pub fn display_refresh(&self) -> Duration {
        Duration::from_millis(self.hardware.display_refresh_ms)
    }

    /// Log the effective configuration
    pub fn log_summary(&self) {
        tracing::info!("Configuration:");
        tracing::info!("  Device: {} ({})", self.cloud.device_id, self.cloud.device_name);
        match &self.cloud.bridge {
            Some(bridge) => tracing::info!("  Bridge: {}", bridge),
            None => tracing::info!("  Bridge: in-memory"),
        }
        tracing::info!(
            "  Telemetry: every {}s, long point every {}s, ttl {}s",
            self.telemetry.period_secs,
            self.telemetry.long_interval_secs,
            self.telemetry.ttl_secs
        );
        tracing::info!("  Scheduler tick: {}ms", self.scheduler.tick_interval_ms);
        match &self.credentials.directory {
            Some(dir) => tracing::info!("  Credentials: {}", dir.display()),
            None => tracing::info!("  Credentials: unprovisioned"),
        }
        match &self.records.directory {
            Some(dir) => tracing::info!("  Records: {}", dir.display()),
            None => tracing::info!("  Records: in-memory"),
        }
    }
}

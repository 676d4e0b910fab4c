//! Incubator device agent
//!
//! Wires the incubator state manager to its collaborators:
//!
//! - [`config`]: layered [`AgentConfig`] (defaults, TOML file, environment)
//! - [`logging`]: tracing subscriber setup
//! - [`credentials`]: provisioning file check
//! - [`hardware`]: control-board I/O, reading poller and actuator writer
//! - [`records`]: experiment, protocol and device records pulled on refresh
//! - [`capture`]: camera and frame sink behind thumbnail/preview pipelines
//! - [`display`]: read-only status view
//! - [`agent`]: owns the threads and starts and stops everything

pub mod agent;
pub mod capture;
pub mod config;
pub mod credentials;
pub mod display;
pub mod error;
pub mod hardware;
pub mod logging;
pub mod records;

pub use agent::{Agent, Collaborators};
pub use config::{AgentConfig, ConfigError};
pub use error::{AgentError, Result};
pub use logging::{init_logging, init_logging_from_env, LoggingError, LoggingMode};

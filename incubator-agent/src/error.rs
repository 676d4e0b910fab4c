use crate::capture::CameraError;
use crate::config::ConfigError;
use crate::credentials::CredentialError;
use crate::hardware::HardwareError;
use crate::logging::LoggingError;
use incubator_state::{StateError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Provisioning error: {0}")]
    Credentials(#[from] CredentialError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Cloud error: {0}")]
    Cloud(#[from] cloud_sync::CloudError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] incubator_scheduler::SchedulerError),

    #[error("Thread error: {0}")]
    Thread(#[from] thread_manager::ThreadError),

    #[error("Hardware error: {0}")]
    Hardware(#[from] HardwareError),

    #[error("Camera error: {0}")]
    Camera(#[from] CameraError),

    #[error("Board readings rejected: {0}")]
    ReadingsRejected(ValidationError),

    #[error("Board readings rejected")]
    ReadingsRejectedUnknown,
}

pub type Result<T> = std::result::Result<T, AgentError>;

use incubator_state::{StateError, ValidationError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Protocol step {step} rejected by the control board: {source}")]
    StepRejected {
        step: usize,
        #[source]
        source: ValidationError,
    },

    #[error("Protocol step {step} rejected by the control board")]
    StepRejectedUnknown { step: usize },

    #[error("Thread error: {0}")]
    Thread(#[from] thread_manager::ThreadError),
}

pub type Result<T> = std::result::Result<T, SchedulerError>;

//! Error types for incubator-state

use state_store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("Model not registered: {0}")]
    NotRegistered(&'static str),

    /// The calling thread already has a transaction open on this model
    #[error("Transaction on {model} is already open on this thread")]
    Reentrant { model: &'static str },

    #[error("State store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for StateError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotRegistered(model) => StateError::NotRegistered(model),
            StoreError::Reentrant { model } => StateError::Reentrant { model },
            other => StateError::Store(other),
        }
    }
}

pub type Result<T> = std::result::Result<T, StateError>;

//! Error types for state-store

use crate::model::ValidationError;

/// Errors returned by [`StateStore`](crate::StateStore) operations
///
/// A rejected commit is not an error: [`Transaction::commit`](crate::Transaction::commit)
/// reports it as `false`.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The model type was never inserted
    #[error("Model not registered: {0}")]
    NotRegistered(&'static str),

    /// The model type was inserted twice
    #[error("Model already registered: {0}")]
    AlreadyRegistered(&'static str),

    /// The current thread already holds a transaction on this model
    #[error("Transaction on {model} is already open on this thread")]
    Reentrant {
        /// Model key
        model: &'static str,
    },

    /// The initial value failed validation
    #[error("Invalid initial value: {0}")]
    Invalid(#[from] ValidationError),
}

/// Result type for state-store operations
pub type Result<T> = std::result::Result<T, StoreError>;

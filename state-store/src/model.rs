//! Model trait for transactional, validated state values
//!
//! The Model trait defines the contract for values that can be stored in a
//! [`StateStore`](crate::StateStore) and mutated through transactions.
//!
//! # Example
//!
//! ```rust
//! use state_store::{Model, ValidationError};
//!
//! #[derive(Clone, PartialEq, Debug)]
//! pub struct Thermostat {
//!     pub target: f64,
//! }
//!
//! impl Model for Thermostat {
//!     const KEY: &'static str = "thermostat";
//!
//!     fn validate(&mut self, _previous: Option<&Self>) -> Result<(), ValidationError> {
//!         ValidationError::check_range(Self::KEY, "target", self.target, 4.0, 45.0)
//!     }
//! }
//! ```

/// Marker trait for values that live in a StateStore
///
/// Models must be:
/// - Clone: transactions work on a private copy until commit
/// - PartialEq: for change detection (only notify when the value actually changes)
/// - Send + Sync + 'static: for type-erased, cross-thread storage
pub trait Model: Clone + Send + Sync + PartialEq + 'static {
    /// Unique key identifying this model type
    ///
    /// Used for logging, commit notifications and routing commit events.
    const KEY: &'static str;

    /// Check the model's invariants before it becomes canonical.
    ///
    /// Called on every commit with the previously committed value (or `None`
    /// when the model is first inserted). Implementations may derive fields
    /// from validated input, e.g. decoded credential claims.
    fn validate(&mut self, _previous: Option<&Self>) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// An invariant violation reported by [`Model::validate`]
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{model}.{field}: {reason}")]
pub struct ValidationError {
    /// Model key the violation belongs to
    pub model: &'static str,
    /// Field that failed validation
    pub field: String,
    /// Human-readable reason
    pub reason: String,
}

impl ValidationError {
    /// Create a new validation error
    pub fn new(model: &'static str, field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            model,
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Ensure `value` lies in the closed interval `[min, max]`
    ///
    /// Non-finite values and inverted bounds are rejected as well.
    pub fn check_range(
        model: &'static str,
        field: &str,
        value: f64,
        min: f64,
        max: f64,
    ) -> Result<(), ValidationError> {
        if min > max {
            return Err(Self::new(
                model,
                field,
                format!("invalid bounds [{min}, {max}]"),
            ));
        }
        if !value.is_finite() || value < min || value > max {
            return Err(Self::new(
                model,
                field,
                format!("{value} outside [{min}, {max}]"),
            ));
        }
        Ok(())
    }
}

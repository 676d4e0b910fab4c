//! Incubator state models, event registry and state manager
//!
//! # Overview
//!
//! - [`models`]: the fixed set of shared models (device, control board,
//!   experiment, imaging profile, protocol) and their invariants
//! - [`Registry`]: one event bus per [`EventName`], shared as `Arc<Registry>`
//! - [`StateManager`]: scoped, validated transactions over the models; every
//!   accepted change triggers the model's *changed* event
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use incubator_state::models::{Device, Experiment, IcbLimits};
//! use incubator_state::{EventName, Registry, StateManager};
//!
//! let registry = Arc::new(Registry::new());
//! registry.register(EventName::ExperimentChanged, 0, |_| {
//!     println!("experiment changed");
//!     Ok(())
//! });
//!
//! let state = StateManager::new(registry, Device::new("dev-1", "Bench A"), IcbLimits::default()).unwrap();
//! state.update::<Experiment, _>(|e| e.start("exp-1", chrono::Utc::now())).unwrap();
//! ```

pub mod error;
pub mod manager;
pub mod models;
pub mod registry;

pub use error::{Result, StateError};
pub use manager::{InitialState, StateManager};
pub use registry::{
    CaptureKind, CaptureRequest, EventArgs, EventName, Registry, StatusLevel, SystemStatus,
};

// Re-exported so dependents name one crate for transactions
pub use state_store::{ChangeIterator, CommitEvent, Model, Transaction, ValidationError};

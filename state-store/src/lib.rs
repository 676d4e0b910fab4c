//! Generic Transactional State Library
//!
//! A type-safe store of shared model values where every read and write
//! happens inside a scoped, exclusive transaction ending in a validated commit.
//!
//! # Features
//!
//! - **Per-model locking**: one lock per model type; unrelated models never block each other
//! - **Validated commits**: invariants are checked before a value becomes canonical;
//!   a rejected commit leaves the previous value untouched
//! - **Change Detection**: notifications only fire when the value actually changed
//! - **Guaranteed release**: locks are released when the transaction goes out of scope,
//!   on every path, before notifications are delivered
//! - **Re-entrancy detection**: nested transactions on the same model return an error
//!   instead of deadlocking
//!
//! # Quick Start
//!
//! ```rust
//! use state_store::{Model, StateStore, ValidationError};
//!
//! #[derive(Clone, PartialEq, Debug)]
//! struct Humidity(f64);
//!
//! impl Model for Humidity {
//!     const KEY: &'static str = "humidity";
//!
//!     fn validate(&mut self, _previous: Option<&Self>) -> Result<(), ValidationError> {
//!         ValidationError::check_range(Self::KEY, "rh", self.0, 0.0, 100.0)
//!     }
//! }
//!
//! let store = StateStore::new();
//! store.insert(Humidity(40.0)).unwrap();
//!
//! let mut tx = store.transaction::<Humidity>().unwrap();
//! tx.0 = 140.0;
//! assert!(!tx.commit());
//! drop(tx);
//!
//! assert_eq!(store.snapshot::<Humidity>().unwrap(), Humidity(40.0));
//! ```
//!
//! # Architecture
//!
//! ```text
//! StateStore
//!     │
//!     ├── models: HashMap<TypeId, Arc<Mutex<Slot<M>>>>
//!     │
//!     ├── hooks: Vec<CommitHook>          (called after lock release)
//!     │
//!     └── event_channel: mpsc::channel<CommitEvent>   (watched models only)
//!             │
//!             └── ChangeIterator
//! ```

// Modules
pub mod error;
pub mod event;
pub mod iter;
pub mod model;
pub mod store;

// Re-exports - Public API
pub use error::{Result, StoreError};
pub use event::CommitEvent;
pub use iter::{ChangeIterator, TryIter};
pub use model::{Model, ValidationError};
pub use store::{CommitHook, StateStore, Transaction};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::event::CommitEvent;
    pub use crate::model::{Model, ValidationError};
    pub use crate::store::{StateStore, Transaction};
}

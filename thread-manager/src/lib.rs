//! Thread lifecycle and locking utilities
//!
//! ```rust
//! use std::sync::Arc;
//! use thread_manager::{ThreadManager, DELTA_LOCK};
//!
//! let threads = Arc::new(ThreadManager::new());
//!
//! let t = Arc::clone(&threads);
//! threads
//!     .threaded(false)
//!     .set_name("resolver")
//!     .spawn(move || {
//!         t.with_lock(DELTA_LOCK, || {
//!             // one delta at a time
//!         });
//!     })
//!     .unwrap();
//!
//! threads.join_all();
//! ```

pub mod error;
pub mod lock;
pub mod shutdown;
pub mod threads;

pub use error::{Result, ThreadError};
pub use lock::{NamedLock, NamedLockGuard, DELTA_LOCK};
pub use shutdown::ShutdownSignal;
pub use threads::{ThreadManager, Threaded};

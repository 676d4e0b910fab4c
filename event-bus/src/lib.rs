//! Synchronous publish/subscribe for device control code
//!
//! - [`EventBus`]: a named publish point. Subscribers carry a priority and an
//!   optional predicate; triggering runs matching subscribers in priority order
//!   and isolates each subscriber's failure from the rest.
//! - [`Pipeline`]: an ordered list of named stages over a shared context that
//!   stops at the first failing stage. Pipelines attach to buses as ordinary
//!   subscribers.
//!
//! ```rust
//! use std::sync::Arc;
//! use event_bus::{EventBus, Pipeline};
//!
//! let bus = EventBus::<String>::new("capture requested");
//! let pipeline = Arc::new(
//!     Pipeline::<Vec<String>>::new("thumbnail")
//!         .stage("expose", |frames| { frames.push("raw".into()); Ok(()) })
//!         .stage("encode", |frames| { frames.push("jpeg".into()); Ok(()) }),
//! );
//! pipeline.attach(&bus, 0, |_request| Vec::new());
//!
//! assert_eq!(bus.trigger(&"exp-1".to_string()), 1);
//! ```

pub mod bus;
pub mod error;
pub mod pipeline;

pub use bus::{EventBus, HandlerError, HandlerResult, SubscriptionId};
pub use error::PipelineError;
pub use pipeline::{Pipeline, PipelineOutcome};

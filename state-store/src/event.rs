//! Commit events for model updates
//!
//! When a transaction commits a value that differs from the canonical one, a
//! `CommitEvent` is emitted containing the model key and its new revision.

use std::time::Instant;

/// A commit event emitted when a model's canonical value changes
///
/// Events only include the model key and revision, not the value. Use
/// `StateStore::snapshot()` to read the value after receiving an event.
///
/// # Example
///
/// ```rust,ignore
/// for event in store.iter() {
///     println!("{} is now at revision {}", event.model_key, event.revision);
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CommitEvent {
    /// The model key that changed (matches `Model::KEY`)
    pub model_key: &'static str,

    /// Revision of the canonical value after the commit
    pub revision: u64,

    /// When the commit happened
    pub timestamp: Instant,
}

impl CommitEvent {
    /// Create a new commit event
    pub fn new(model_key: &'static str, revision: u64) -> Self {
        Self {
            model_key,
            revision,
            timestamp: Instant::now(),
        }
    }
}

impl PartialEq for CommitEvent {
    fn eq(&self, other: &Self) -> bool {
        // Timestamp not included in equality
        self.model_key == other.model_key && self.revision == other.revision
    }
}

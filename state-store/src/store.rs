//! Transactional model storage
//!
//! This module provides the core storage primitives:
//! - `StateStore`: one lock-guarded canonical value per model type
//! - `Transaction<M>`: scoped, exclusive access to one model with validated commit

use std::any::{Any, TypeId};
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::ops::{Deref, DerefMut};
use std::sync::{mpsc, Arc, Mutex};

use parking_lot::{ArcMutexGuard, RawMutex, RwLock};

use crate::error::{Result, StoreError};
use crate::event::CommitEvent;
use crate::iter::ChangeIterator;
use crate::model::{Model, ValidationError};

/// Callback invoked after a commit changed a model's canonical value
///
/// Hooks run on the committing thread after the model lock is released.
pub type CommitHook = Arc<dyn Fn(&CommitEvent) + Send + Sync>;

/// Canonical value of one model plus its revision counter
struct Slot<M> {
    value: M,
    revision: u64,
}

type Cell<M> = parking_lot::Mutex<Slot<M>>;

// ============================================================================
// Re-entrancy tracking
// ============================================================================

thread_local! {
    /// (store id, model type) pairs held by the current thread
    static HELD: RefCell<HashSet<(usize, TypeId)>> = RefCell::new(HashSet::new());
}

/// Marks a model as held by the current thread until dropped
struct HeldMarker {
    key: (usize, TypeId),
}

impl HeldMarker {
    fn acquire(store_id: usize, type_id: TypeId, model: &'static str) -> Result<Self> {
        let key = (store_id, type_id);
        let inserted = HELD.with(|held| held.borrow_mut().insert(key));
        if !inserted {
            return Err(StoreError::Reentrant { model });
        }
        Ok(Self { key })
    }
}

impl Drop for HeldMarker {
    fn drop(&mut self) {
        let _ = HELD.try_with(|held| {
            held.borrow_mut().remove(&self.key);
        });
    }
}

// ============================================================================
// Notifier - commit fan-out shared by the store and its transactions
// ============================================================================

#[derive(Clone)]
struct Notifier {
    /// Model keys whose commits are forwarded to `iter()`
    watched: Arc<RwLock<HashSet<&'static str>>>,
    event_tx: mpsc::Sender<CommitEvent>,
    hooks: Arc<RwLock<Vec<CommitHook>>>,
}

impl Notifier {
    fn dispatch(&self, event: CommitEvent) {
        // Snapshot so hooks may register further hooks
        let hooks: Vec<CommitHook> = self.hooks.read().clone();
        for hook in &hooks {
            hook(&event);
        }

        if self.watched.read().contains(event.model_key) {
            let _ = self.event_tx.send(event);
        }
    }
}

// ============================================================================
// StateStore
// ============================================================================

/// Store of canonical model values, one per model type
///
/// Every read or write of a model goes through a [`Transaction`] that holds
/// the model's lock for its whole scope. Different model types lock
/// independently, so a slow transaction on one model never blocks another.
///
/// # Example
///
/// ```rust,ignore
/// let store = StateStore::new();
/// store.insert(Thermostat { target: 37.0 })?;
///
/// {
///     let mut tx = store.transaction::<Thermostat>()?;
///     tx.target = 36.5;
///     if !tx.commit() {
///         // rejected: canonical value untouched, nothing notified
///     }
/// } // lock released here, commit hooks run afterwards
///
/// let current = store.snapshot::<Thermostat>()?;
/// ```
pub struct StateStore {
    /// Model type -> Arc<Cell<M>>
    models: Arc<RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>>,

    notifier: Notifier,

    /// Receiver side of the commit channel (shared between clones)
    event_rx: Arc<Mutex<mpsc::Receiver<CommitEvent>>>,
}

impl StateStore {
    /// Create an empty store
    pub fn new() -> Self {
        let (event_tx, event_rx) = mpsc::channel();

        Self {
            models: Arc::new(RwLock::new(HashMap::new())),
            notifier: Notifier {
                watched: Arc::new(RwLock::new(HashSet::new())),
                event_tx,
                hooks: Arc::new(RwLock::new(Vec::new())),
            },
            event_rx: Arc::new(Mutex::new(event_rx)),
        }
    }

    /// Register the initial value of a model type
    ///
    /// The value is validated first. Each model type can be registered once.
    pub fn insert<M: Model>(&self, mut value: M) -> Result<()> {
        value.validate(None)?;

        let mut models = self.models.write();
        if models.contains_key(&TypeId::of::<M>()) {
            return Err(StoreError::AlreadyRegistered(M::KEY));
        }

        let cell: Arc<Cell<M>> = Arc::new(parking_lot::Mutex::new(Slot { value, revision: 0 }));
        models.insert(TypeId::of::<M>(), cell);
        tracing::debug!(model = M::KEY, "model registered");
        Ok(())
    }

    /// Check whether a model type has been registered
    pub fn contains<M: Model>(&self) -> bool {
        self.models.read().contains_key(&TypeId::of::<M>())
    }

    /// Number of registered model types
    pub fn model_count(&self) -> usize {
        self.models.read().len()
    }

    /// Open a transaction on one model type
    ///
    /// Blocks until no other thread holds the model. Returns
    /// [`StoreError::Reentrant`] if the calling thread already has a
    /// transaction open on the same model.
    pub fn transaction<M: Model>(&self) -> Result<Transaction<M>> {
        let cell = self.cell::<M>()?;
        let held = HeldMarker::acquire(self.id(), TypeId::of::<M>(), M::KEY)?;

        let guard = cell.lock_arc();
        let working = guard.value.clone();

        Ok(Transaction {
            guard: Some(guard),
            working,
            pending: None,
            rejection: None,
            notifier: self.notifier.clone(),
            held: Some(held),
        })
    }

    /// Read-only copy of a model's canonical value
    pub fn snapshot<M: Model>(&self) -> Result<M> {
        let cell = self.cell::<M>()?;
        let _held = HeldMarker::acquire(self.id(), TypeId::of::<M>(), M::KEY)?;
        let value = cell.lock().value.clone();
        Ok(value)
    }

    /// Current revision of a model (0 until the first accepted change)
    pub fn revision<M: Model>(&self) -> Result<u64> {
        let cell = self.cell::<M>()?;
        let _held = HeldMarker::acquire(self.id(), TypeId::of::<M>(), M::KEY)?;
        let revision = cell.lock().revision;
        Ok(revision)
    }

    /// Apply `f` inside a transaction and commit
    ///
    /// Returns the commit result: `false` means the mutation was rejected and
    /// discarded.
    pub fn update<M, F>(&self, f: F) -> Result<bool>
    where
        M: Model,
        F: FnOnce(&mut M),
    {
        let mut tx = self.transaction::<M>()?;
        f(&mut tx);
        Ok(tx.commit())
    }

    /// Register a hook called after every accepted, value-changing commit
    pub fn on_commit(&self, hook: CommitHook) {
        self.notifier.hooks.write().push(hook);
    }

    /// Forward commits of this model key to `iter()`
    pub fn watch(&self, model_key: &'static str) {
        self.notifier.watched.write().insert(model_key);
    }

    /// Stop forwarding commits of this model key
    pub fn unwatch(&self, model_key: &'static str) {
        self.notifier.watched.write().remove(model_key);
    }

    /// Check if a model key is being watched
    pub fn is_watched(&self, model_key: &'static str) -> bool {
        self.notifier.watched.read().contains(model_key)
    }

    /// Create a blocking iterator over commit events of watched models
    pub fn iter(&self) -> ChangeIterator {
        ChangeIterator::new(Arc::clone(&self.event_rx))
    }

    fn id(&self) -> usize {
        Arc::as_ptr(&self.models) as *const () as usize
    }

    fn cell<M: Model>(&self) -> Result<Arc<Cell<M>>> {
        let erased = self
            .models
            .read()
            .get(&TypeId::of::<M>())
            .cloned()
            .ok_or(StoreError::NotRegistered(M::KEY))?;

        erased
            .downcast::<Cell<M>>()
            .map_err(|_| StoreError::NotRegistered(M::KEY))
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for StateStore {
    fn clone(&self) -> Self {
        Self {
            models: Arc::clone(&self.models),
            notifier: self.notifier.clone(),
            event_rx: Arc::clone(&self.event_rx),
        }
    }
}

impl std::fmt::Debug for StateStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateStore")
            .field("model_count", &self.model_count())
            .finish()
    }
}

// ============================================================================
// Transaction<M>
// ============================================================================

/// Exclusive, scoped handle to one model
///
/// Dereferences to a private working copy. Changes become canonical only
/// through [`Transaction::commit`]. Dropping the transaction releases the
/// model lock on every path, then delivers the commit notification (if any).
///
/// A transaction is tied to the thread that opened it.
pub struct Transaction<M: Model> {
    guard: Option<ArcMutexGuard<RawMutex, Slot<M>>>,
    working: M,
    pending: Option<CommitEvent>,
    rejection: Option<ValidationError>,
    notifier: Notifier,
    held: Option<HeldMarker>,
}

impl<M: Model> Transaction<M> {
    /// Validate the working copy and make it canonical
    ///
    /// On success returns `true`; a notification is queued if the value
    /// differs from the previous canonical value. On failure the working copy
    /// is reset to the canonical value, nothing is notified and `false` is
    /// returned. The reason is available from [`Transaction::rejection`].
    pub fn commit(&mut self) -> bool {
        let Some(guard) = self.guard.as_mut() else {
            return false;
        };

        let mut candidate = self.working.clone();
        match candidate.validate(Some(&guard.value)) {
            Ok(()) => {
                if candidate != guard.value {
                    guard.revision += 1;
                    guard.value = candidate.clone();
                    self.pending = Some(CommitEvent::new(M::KEY, guard.revision));
                    tracing::debug!(model = M::KEY, revision = guard.revision, "commit accepted");
                }
                self.working = candidate;
                self.rejection = None;
                true
            }
            Err(err) => {
                tracing::warn!(model = M::KEY, error = %err, "commit rejected");
                self.working = guard.value.clone();
                self.rejection = Some(err);
                false
            }
        }
    }

    /// Discard uncommitted changes
    pub fn rollback(&mut self) {
        if let Some(guard) = self.guard.as_ref() {
            self.working = guard.value.clone();
        }
    }

    /// Reason the last commit was rejected, if it was
    pub fn rejection(&self) -> Option<&ValidationError> {
        self.rejection.as_ref()
    }

    /// Revision of the canonical value
    pub fn revision(&self) -> u64 {
        self.guard.as_ref().map(|g| g.revision).unwrap_or_default()
    }

    /// The canonical value, ignoring uncommitted changes
    pub fn committed(&self) -> &M {
        match self.guard.as_ref() {
            Some(guard) => &guard.value,
            None => &self.working,
        }
    }
}

impl<M: Model> Deref for Transaction<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.working
    }
}

impl<M: Model> DerefMut for Transaction<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.working
    }
}

impl<M: Model> Drop for Transaction<M> {
    fn drop(&mut self) {
        // Release the lock and the re-entrancy marker before notifying, so
        // hooks can open transactions on this model again.
        drop(self.guard.take());
        drop(self.held.take());

        if let Some(event) = self.pending.take() {
            self.notifier.dispatch(event);
        }
    }
}

impl<M: Model + std::fmt::Debug> std::fmt::Debug for Transaction<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("model", &M::KEY)
            .field("working", &self.working)
            .field("revision", &self.revision())
            .finish()
    }
}

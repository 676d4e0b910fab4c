//! StateManager - transactional access to the incubator models
//!
//! Wraps a [`StateStore`] holding the five incubator models and connects its
//! commit notifications to the [`Registry`]: every accepted, value-changing
//! commit triggers the matching *changed* event after the model lock has been
//! released.

use crate::error::Result;
use crate::models::{Device, Experiment, Icb, IcbLimits, ImagingProfile, Protocol};
use crate::registry::{EventArgs, EventName, Registry};
use state_store::{ChangeIterator, CommitEvent, Model, StateStore, Transaction};
use std::sync::Arc;

/// Initial values of every model
#[derive(Debug, Clone, Default)]
pub struct InitialState {
    pub device: Device,
    pub icb: Icb,
    pub experiment: Experiment,
    pub imaging: ImagingProfile,
    pub protocol: Protocol,
}

impl InitialState {
    pub fn new(device: Device, limits: IcbLimits) -> Self {
        Self {
            device,
            icb: Icb::new(limits),
            ..Self::default()
        }
    }
}

/// Owner of the canonical model values
///
/// Cheap to clone; clones share the same models and registry.
///
/// ```rust
/// use std::sync::Arc;
/// use incubator_state::{models::{Device, Icb, IcbLimits, Setpoint}, Registry, StateManager};
///
/// let registry = Arc::new(Registry::new());
/// let state = StateManager::new(Arc::clone(&registry), Device::new("dev-1", "Bench A"), IcbLimits::default()).unwrap();
///
/// {
///     let mut icb = state.transaction::<Icb>().unwrap();
///     icb.tp = Setpoint::new(36.5);
///     assert!(icb.commit());
/// } // lock released, "icb changed" fires here
///
/// assert_eq!(state.snapshot::<Icb>().unwrap().tp.value, 36.5);
/// ```
#[derive(Clone)]
pub struct StateManager {
    store: StateStore,
    registry: Arc<Registry>,
}

impl StateManager {
    pub fn new(registry: Arc<Registry>, device: Device, limits: IcbLimits) -> Result<Self> {
        Self::with_initial(registry, InitialState::new(device, limits))
    }

    /// Create the manager with explicit initial values
    ///
    /// Fails if any initial value violates its model's invariants.
    pub fn with_initial(registry: Arc<Registry>, initial: InitialState) -> Result<Self> {
        let store = StateStore::new();
        store.insert(initial.device)?;
        store.insert(initial.icb)?;
        store.insert(initial.experiment)?;
        store.insert(initial.imaging)?;
        store.insert(initial.protocol)?;

        let hook_registry = Arc::clone(&registry);
        store.on_commit(Arc::new(move |event: &CommitEvent| {
            if let Some(name) = EventName::for_model(event.model_key) {
                tracing::debug!(
                    model = event.model_key,
                    revision = event.revision,
                    "Commit accepted, triggering {}",
                    name
                );
                hook_registry.trigger(name, &EventArgs::None);
            }
        }));

        tracing::debug!("StateManager initialized with {} models", store.model_count());
        Ok(Self { store, registry })
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Open an exclusive transaction on model `M`
    ///
    /// Blocks until no other thread holds `M`. Opening a second transaction
    /// on the same model from the same thread returns
    /// [`StateError::Reentrant`](crate::StateError::Reentrant).
    pub fn transaction<M: Model>(&self) -> Result<Transaction<M>> {
        Ok(self.store.transaction::<M>()?)
    }

    /// Read-only copy of `M`
    pub fn snapshot<M: Model>(&self) -> Result<M> {
        Ok(self.store.snapshot::<M>()?)
    }

    /// Open, apply `f`, commit and close in one call
    pub fn update<M, F>(&self, f: F) -> Result<bool>
    where
        M: Model,
        F: FnOnce(&mut M),
    {
        Ok(self.store.update::<M, F>(f)?)
    }

    pub fn revision<M: Model>(&self) -> Result<u64> {
        Ok(self.store.revision::<M>()?)
    }

    /// Forward commits of `M` to [`changes`](Self::changes)
    pub fn watch<M: Model>(&self) {
        self.store.watch(M::KEY);
    }

    /// Forward commits of every model to [`changes`](Self::changes)
    pub fn watch_all(&self) {
        self.watch::<Device>();
        self.watch::<Icb>();
        self.watch::<Experiment>();
        self.watch::<ImagingProfile>();
        self.watch::<Protocol>();
    }

    /// Blocking iterator over commits of watched models
    pub fn changes(&self) -> ChangeIterator {
        self.store.iter()
    }
}

impl std::fmt::Debug for StateManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateManager")
            .field("store", &self.store)
            .field("registry", &self.registry)
            .finish()
    }
}

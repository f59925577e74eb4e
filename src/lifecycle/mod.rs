// src/lifecycle/mod.rs

//! Engine lifecycle: owns the single engine instance and its load state.
//!
//! There is exactly one live instance at a time. `load` initialises it,
//! `unload` replaces it with a fresh, unloaded instance from the factory and
//! terminates the old one. State changes are forwarded to the processor so the
//! queue core always sees the same state callers do.

mod subscription;

pub use subscription::Subscription;

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::backend::{EngineFactory, EngineLocations, SharedEngine};
use crate::errors::{FfqueueError, Result};
use crate::processor::{Inbound, ProcessorEvent};
use crate::types::EngineState;

struct Slot {
    state: EngineState,
    engine: SharedEngine,
    /// Kept alive for as long as `engine` is the current instance.
    _subscription: Subscription,
}

pub struct LifecycleManager {
    factory: EngineFactory,
    locations: EngineLocations,
    notifier: mpsc::WeakSender<Inbound>,
    slot: Mutex<Slot>,
}

impl std::fmt::Debug for LifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleManager")
            .field("state", &self.state())
            .field("locations", &self.locations)
            .finish_non_exhaustive()
    }
}

impl LifecycleManager {
    /// Create the manager with a first, unloaded instance.
    ///
    /// Must be called from within a Tokio runtime (the subscription task is
    /// spawned immediately).
    pub fn new(
        factory: EngineFactory,
        locations: EngineLocations,
        notifier: mpsc::WeakSender<Inbound>,
    ) -> Self {
        let engine = factory();
        let subscription = Subscription::spawn(&engine, notifier.clone());
        Self {
            factory,
            locations,
            notifier,
            slot: Mutex::new(Slot {
                state: EngineState::Unloaded,
                engine,
                _subscription: subscription,
            }),
        }
    }

    pub fn state(&self) -> EngineState {
        self.lock().state
    }

    pub fn loaded(&self) -> bool {
        self.state().is_loaded()
    }

    pub fn loading(&self) -> bool {
        self.state().is_loading()
    }

    /// The current engine instance.
    pub fn engine(&self) -> SharedEngine {
        Arc::clone(&self.lock().engine)
    }

    /// Initialise the engine. No-op while loading or loaded.
    pub async fn load(&self) -> Result<()> {
        let engine = {
            let mut slot = self.lock();
            if slot.state != EngineState::Unloaded {
                debug!(state = %slot.state, "load ignored");
                return Ok(());
            }
            slot.state = EngineState::Loading;
            Arc::clone(&slot.engine)
        };
        self.notify_state(EngineState::Loading).await;

        info!(core = %self.locations.core.display(), "loading engine");
        let outcome = engine.load(&self.locations).await;

        let next = {
            let mut slot = self.lock();
            // An unload cannot happen while loading, so `slot.engine` is still
            // the instance we just loaded.
            slot.state = if outcome.is_ok() {
                EngineState::Loaded
            } else {
                EngineState::Unloaded
            };
            slot.state
        };
        self.notify_state(next).await;

        match outcome {
            Ok(()) => {
                info!("engine loaded");
                Ok(())
            }
            Err(FfqueueError::EngineInit(msg)) => {
                warn!(error = %msg, "engine failed to load");
                Err(FfqueueError::EngineInit(msg))
            }
            Err(other) => {
                warn!(error = %other, "engine failed to load");
                Err(FfqueueError::EngineInit(other.to_string()))
            }
        }
    }

    /// Replace the engine with a fresh, unloaded instance. No-op unless loaded.
    pub async fn unload(&self) -> Result<()> {
        let old = {
            let mut slot = self.lock();
            if slot.state != EngineState::Loaded {
                debug!(state = %slot.state, "unload ignored");
                return Ok(());
            }
            let engine = (self.factory)();
            let subscription = Subscription::spawn(&engine, self.notifier.clone());
            let old = std::mem::replace(&mut slot.engine, engine);
            // Dropping the old subscription stops forwarding its events.
            slot._subscription = subscription;
            slot.state = EngineState::Unloaded;
            old
        };

        self.notify_state(EngineState::Unloaded).await;
        self.notify(ProcessorEvent::EngineReplaced).await;

        info!("terminating previous engine instance");
        old.terminate().await.map_err(|e| match e {
            FfqueueError::EngineTerminate(msg) => FfqueueError::EngineTerminate(msg),
            other => FfqueueError::EngineTerminate(other.to_string()),
        })
    }

    async fn notify_state(&self, state: EngineState) {
        self.notify(ProcessorEvent::EngineStateChanged(state)).await;
    }

    async fn notify(&self, event: ProcessorEvent) {
        let Some(tx) = self.notifier.upgrade() else {
            debug!(?event, "processor gone; dropping lifecycle event");
            return;
        };
        if tx.send(Inbound::Event(event)).await.is_err() {
            debug!("processor closed; lifecycle event dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

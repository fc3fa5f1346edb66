//! Registration lifecycle.
//!
//! A [`Registration`] holds up to three worker versions for one scope and
//! moves them through `Installing → Waiting → Activating → Active`, with
//! `Redundant` for anything replaced or failed.

use std::fmt;
use std::sync::Arc;

use schedkit_net::{Fetcher, Request};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::worker::{FetchResponse, OfflineCacheWorker, WorkerId};
use crate::ServiceWorkerError;

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Install running.
    Installing,
    /// Installed, waiting for activation.
    Waiting,
    /// Activation running.
    Activating,
    /// Handling fetches.
    Active,
    /// Replaced, failed to install, or unregistered.
    Redundant,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkerState::Installing => "installing",
            WorkerState::Waiting => "waiting",
            WorkerState::Activating => "activating",
            WorkerState::Active => "active",
            WorkerState::Redundant => "redundant",
        };
        f.write_str(name)
    }
}

/// Lifecycle events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// State changed.
    StateChange {
        worker_id: WorkerId,
        cache_name: String,
        state: WorkerState,
    },
    /// A new worker took control of the scope.
    ControllerChange { worker_id: WorkerId },
}

#[derive(Default)]
struct Slots {
    installing: Option<Arc<OfflineCacheWorker>>,
    waiting: Option<Arc<OfflineCacheWorker>>,
    active: Option<Arc<OfflineCacheWorker>>,
}

/// A worker registration for one scope.
pub struct Registration {
    scope: Url,
    fetcher: Arc<dyn Fetcher>,
    slots: RwLock<Slots>,
    event_tx: mpsc::UnboundedSender<LifecycleEvent>,
}

impl Registration {
    /// Create a registration. `fetcher` serves requests while no worker is active.
    pub fn new(
        scope: Url,
        fetcher: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<LifecycleEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        (
            Self {
                scope,
                fetcher,
                slots: RwLock::new(Slots::default()),
                event_tx,
            },
            event_rx,
        )
    }

    pub fn scope(&self) -> &Url {
        &self.scope
    }

    pub async fn installing(&self) -> Option<Arc<OfflineCacheWorker>> {
        self.slots.read().await.installing.clone()
    }

    pub async fn waiting(&self) -> Option<Arc<OfflineCacheWorker>> {
        self.slots.read().await.waiting.clone()
    }

    pub async fn active(&self) -> Option<Arc<OfflineCacheWorker>> {
        self.slots.read().await.active.clone()
    }

    fn emit(&self, worker: &OfflineCacheWorker, state: WorkerState) {
        debug!(scope = %self.scope, worker = %worker.id(), %state, "Worker state changed");
        let _ = self.event_tx.send(LifecycleEvent::StateChange {
            worker_id: worker.id(),
            cache_name: worker.cache_name().to_string(),
            state,
        });
    }

    /// Install a new worker version.
    ///
    /// The active worker keeps serving fetches while the install runs. On
    /// failure the new worker is discarded as redundant and the error is
    /// returned; on success it waits for activation.
    pub async fn update(&self, worker: OfflineCacheWorker) -> Result<(), ServiceWorkerError> {
        let worker = Arc::new(worker);
        {
            let mut slots = self.slots.write().await;
            if slots.installing.is_some() {
                return Err(ServiceWorkerError::State(
                    "another worker is already installing".to_string(),
                ));
            }
            slots.installing = Some(Arc::clone(&worker));
        }
        self.emit(&worker, WorkerState::Installing);

        let result = worker.install().await;

        let mut slots = self.slots.write().await;
        slots.installing = None;
        match result {
            Ok(()) => {
                if let Some(old) = slots.waiting.replace(Arc::clone(&worker)) {
                    self.emit(&old, WorkerState::Redundant);
                }
                self.emit(&worker, WorkerState::Waiting);
                Ok(())
            }
            Err(err) => {
                warn!(scope = %self.scope, worker = %worker.id(), error = %err, "Install failed");
                self.emit(&worker, WorkerState::Redundant);
                Err(err)
            }
        }
    }

    /// Activate the waiting worker.
    ///
    /// Fetches are held until activation, including stale cache eviction,
    /// has finished. The outgoing worker is retired first so none of its
    /// background writes can recreate an evicted bucket.
    pub async fn activate_waiting(&self) -> Result<(), ServiceWorkerError> {
        let mut slots = self.slots.write().await;
        let worker = slots
            .waiting
            .take()
            .ok_or_else(|| ServiceWorkerError::State("no waiting worker".to_string()))?;

        self.emit(&worker, WorkerState::Activating);
        let previous = slots.active.clone();
        if let Some(old) = &previous {
            old.retire().await;
        }

        if let Err(err) = worker.activate().await {
            warn!(scope = %self.scope, worker = %worker.id(), error = %err, "Activation failed");
            if let Some(old) = &previous {
                old.reinstate();
            }
            self.emit(&worker, WorkerState::Waiting);
            slots.waiting = Some(worker);
            return Err(err);
        }

        if let Some(old) = slots.active.replace(Arc::clone(&worker)) {
            self.emit(&old, WorkerState::Redundant);
        }
        self.emit(&worker, WorkerState::Active);
        let _ = self.event_tx.send(LifecycleEvent::ControllerChange {
            worker_id: worker.id(),
        });
        info!(scope = %self.scope, worker = %worker.id(), cache = %worker.cache_name(), "Worker active");
        Ok(())
    }

    /// Activate the waiting worker immediately.
    pub async fn skip_waiting(&self) -> Result<(), ServiceWorkerError> {
        self.activate_waiting().await
    }

    /// Route a page request through the active worker, or straight to the
    /// network when none is active.
    pub async fn handle_fetch(&self, request: Request) -> Result<FetchResponse, ServiceWorkerError> {
        let active = self.slots.read().await.active.clone();
        match active {
            Some(worker) => worker.handle_fetch(request).await,
            None => {
                let response = self.fetcher.fetch(request).await?;
                Ok(FetchResponse::network(response))
            }
        }
    }

    /// Drop every worker. Caches are left in place.
    pub async fn unregister(&self) {
        let mut slots = self.slots.write().await;
        for worker in [
            slots.installing.take(),
            slots.waiting.take(),
            slots.active.take(),
        ]
        .into_iter()
        .flatten()
        {
            self.emit(&worker, WorkerState::Redundant);
        }
        info!(scope = %self.scope, "Unregistered");
    }
}

//! Worker registry: the authoritative map of running worker instances.
//!
//! The registry is the only component that mutates worker lifecycle state.
//! Everything else reads snapshots through its accessors.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::RegistryConfig;
use crate::error::RegistryError;
use crate::worker::instance::WorkerInstance;
use crate::worker::profile::WorkerProfile;
use crate::worker::state::WorkerStatus;

/// Default broadcast channel capacity.
const DEFAULT_EVENT_CAPACITY: usize = 64;

type SpawnFuture = Shared<BoxFuture<'static, Result<WorkerInstance, RegistryError>>>;

/// Lifecycle events emitted by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegistryEvent {
    Spawned {
        worker_id: String,
    },
    Stopped {
        worker_id: String,
    },
    StatusChanged {
        worker_id: String,
        from: WorkerStatus,
        to: WorkerStatus,
    },
}

/// Options passed through to the spawn function.
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    /// Session that will own the new instance.
    pub session_id: Option<String>,
    /// Working directory for the worker process.
    pub directory: Option<String>,
}

#[derive(Default)]
struct RegistryState {
    workers: HashMap<String, WorkerInstance>,
    /// session id -> claimed worker ids
    ownership: HashMap<String, HashSet<String>>,
    last_registration: Option<Instant>,
}

impl RegistryState {
    fn active_count(&self) -> usize {
        self.workers
            .values()
            .filter(|w| !w.status.is_terminal())
            .count()
    }

    fn owned_count(&self, session_id: &str) -> usize {
        self.ownership.get(session_id).map_or(0, HashSet::len)
    }

    fn check_admission(
        &self,
        config: &RegistryConfig,
        session_id: Option<&str>,
    ) -> Result<(), RegistryError> {
        if self.active_count() >= config.max_workers {
            return Err(RegistryError::AtCapacity {
                max: config.max_workers,
            });
        }
        if let Some(session) = session_id
            && self.owned_count(session) >= config.max_workers_per_session
        {
            return Err(RegistryError::SessionLimit {
                session_id: session.to_string(),
                max: config.max_workers_per_session,
            });
        }
        Ok(())
    }

    fn check_rate_limit(&self, config: &RegistryConfig) -> Result<(), RegistryError> {
        if let Some(last) = self.last_registration {
            let elapsed = last.elapsed();
            if elapsed < config.min_spawn_interval {
                return Err(RegistryError::RateLimited {
                    retry_after: config.min_spawn_interval - elapsed,
                });
            }
        }
        Ok(())
    }

    fn drop_ownership(&mut self, worker_id: &str) {
        self.ownership.retain(|_, owned| {
            owned.remove(worker_id);
            !owned.is_empty()
        });
    }
}

/// Registry of worker instances, keyed by profile id.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct WorkerRegistry {
    config: RegistryConfig,
    state: Arc<RwLock<RegistryState>>,
    in_flight: Arc<Mutex<HashMap<String, SpawnFuture>>>,
    events: broadcast::Sender<RegistryEvent>,
}

impl WorkerRegistry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        let (events, _rx) = broadcast::channel(DEFAULT_EVENT_CAPACITY);
        Self {
            config,
            state: Arc::new(RwLock::new(RegistryState::default())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    /// Register an instance under its profile id.
    ///
    /// Fails at capacity, at the owning session's ceiling, when another
    /// registration happened less than `min_spawn_interval` ago, or when a
    /// non-stopped instance already holds the id.
    pub async fn register(&self, instance: WorkerInstance) -> Result<(), RegistryError> {
        let worker_id = instance.id().to_string();
        let mut state = self.state.write().await;

        if state
            .workers
            .get(&worker_id)
            .is_some_and(|existing| !existing.status.is_terminal())
        {
            return Err(RegistryError::AlreadyRegistered { worker_id });
        }

        state.check_admission(&self.config, instance.session_id.as_deref())?;

        if let Err(e) = state.check_rate_limit(&self.config) {
            warn!(worker_id = %worker_id, error = %e, "Worker registration rate limited");
            return Err(e);
        }

        if let Some(session) = instance.session_id.clone() {
            state
                .ownership
                .entry(session)
                .or_default()
                .insert(worker_id.clone());
        }
        state.last_registration = Some(Instant::now());
        state.workers.insert(worker_id.clone(), instance);
        drop(state);

        info!(worker_id = %worker_id, "Worker registered");
        let _ = self.events.send(RegistryEvent::Spawned { worker_id });
        Ok(())
    }

    /// Remove an instance and its ownership links. Does not run the
    /// shutdown hook; the removed instance is returned for that.
    pub async fn unregister(&self, worker_id: &str) -> Option<WorkerInstance> {
        let mut state = self.state.write().await;
        let removed = state.workers.remove(worker_id)?;
        state.drop_ownership(worker_id);
        drop(state);

        info!(worker_id = %worker_id, "Worker unregistered");
        let _ = self.events.send(RegistryEvent::Stopped {
            worker_id: worker_id.to_string(),
        });
        Some(removed)
    }

    /// Mark stopped, unregister and run the shutdown hook.
    pub async fn stop(&self, worker_id: &str) -> bool {
        self.update_status(worker_id, WorkerStatus::Stopped, None)
            .await;
        match self.unregister(worker_id).await {
            Some(instance) => {
                instance.shutdown().await;
                true
            }
            None => false,
        }
    }

    /// Apply a status update. Illegal transitions are logged and ignored
    /// because status feeds arrive out of order.
    pub async fn update_status(
        &self,
        worker_id: &str,
        status: WorkerStatus,
        error: Option<String>,
    ) -> bool {
        let mut state = self.state.write().await;
        let Some(worker) = state.workers.get_mut(worker_id) else {
            debug!(worker_id = %worker_id, %status, "Status update for unknown worker");
            return false;
        };

        let from = worker.status;
        if from == status {
            return false;
        }
        if let Err(reason) = worker.transition_to(status, error) {
            warn!(worker_id = %worker_id, %reason, "Ignoring illegal worker status transition");
            return false;
        }
        drop(state);

        debug!(worker_id = %worker_id, %from, to = %status, "Worker status changed");
        let _ = self.events.send(RegistryEvent::StatusChanged {
            worker_id: worker_id.to_string(),
            from,
            to: status,
        });
        true
    }

    /// Snapshot of one instance.
    pub async fn get(&self, worker_id: &str) -> Option<WorkerInstance> {
        self.state.read().await.workers.get(worker_id).cloned()
    }

    /// Snapshot of every instance, sorted by id.
    pub async fn list(&self) -> Vec<WorkerInstance> {
        let mut all: Vec<_> = self.state.read().await.workers.values().cloned().collect();
        all.sort_by(|a, b| a.id().cmp(b.id()));
        all
    }

    /// Number of non-stopped instances.
    pub async fn active_count(&self) -> usize {
        self.state.read().await.active_count()
    }

    /// Live instances whose profile matches a capability query.
    pub async fn search(&self, query: &str) -> Vec<WorkerInstance> {
        self.list()
            .await
            .into_iter()
            .filter(|w| w.status.is_live() && w.profile.matches_capability(query))
            .collect()
    }

    /// Record that a session claims a worker.
    pub async fn claim(&self, session_id: &str, worker_id: &str) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        if !state.workers.contains_key(worker_id) {
            return Err(RegistryError::NotFound {
                worker_id: worker_id.to_string(),
            });
        }
        let already = state
            .ownership
            .get(session_id)
            .is_some_and(|owned| owned.contains(worker_id));
        if !already && state.owned_count(session_id) >= self.config.max_workers_per_session {
            return Err(RegistryError::SessionLimit {
                session_id: session_id.to_string(),
                max: self.config.max_workers_per_session,
            });
        }
        state
            .ownership
            .entry(session_id.to_string())
            .or_default()
            .insert(worker_id.to_string());
        Ok(())
    }

    /// Worker ids claimed by a session, sorted.
    pub async fn claims(&self, session_id: &str) -> Vec<String> {
        let state = self.state.read().await;
        let mut owned: Vec<_> = state
            .ownership
            .get(session_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default();
        owned.sort();
        owned
    }

    /// Stop every worker owned by a session. Returns how many were stopped.
    pub async fn release_session(&self, session_id: &str) -> usize {
        let owned = self.claims(session_id).await;
        let mut stopped = 0;
        for worker_id in owned {
            if self.stop(&worker_id).await {
                stopped += 1;
            }
        }
        if stopped > 0 {
            info!(session_id = %session_id, count = stopped, "Released session workers");
        }
        stopped
    }

    /// Stop every registered worker.
    pub async fn shutdown_all(&self) {
        let ids: Vec<String> = self.state.read().await.workers.keys().cloned().collect();
        for worker_id in ids {
            self.stop(&worker_id).await;
        }
    }

    /// Forget the last registration time so the next one is not rate limited.
    pub async fn reset_rate_limit(&self) {
        self.state.write().await.last_registration = None;
    }

    /// Return the live instance for `profile`, or spawn one.
    ///
    /// Concurrent calls for the same profile share a single in-flight spawn.
    /// If registration of a freshly spawned instance fails, the instance is
    /// shut down before the error is returned.
    pub async fn get_or_spawn<F, Fut>(
        &self,
        profile: &WorkerProfile,
        options: SpawnOptions,
        spawn: F,
    ) -> Result<WorkerInstance, RegistryError>
    where
        F: FnOnce(WorkerProfile, SpawnOptions) -> Fut + Send + 'static,
        Fut: Future<Output = Result<WorkerInstance, String>> + Send + 'static,
    {
        if let Some(existing) = self.get(&profile.id).await
            && existing.status.is_live()
        {
            return Ok(existing);
        }

        let pending = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get(&profile.id) {
                Some(pending) => {
                    debug!(worker_id = %profile.id, "Joining in-flight spawn");
                    pending.clone()
                }
                None => {
                    let registry = self.clone();
                    let owned_profile = profile.clone();
                    let worker_id = profile.id.clone();
                    let pending = async move {
                        let result = registry
                            .spawn_and_register(owned_profile, options, spawn)
                            .await;
                        registry.in_flight.lock().await.remove(&worker_id);
                        result
                    }
                    .boxed()
                    .shared();
                    in_flight.insert(profile.id.clone(), pending.clone());
                    pending
                }
            }
        };

        pending.await
    }

    async fn spawn_and_register<F, Fut>(
        &self,
        profile: WorkerProfile,
        options: SpawnOptions,
        spawn: F,
    ) -> Result<WorkerInstance, RegistryError>
    where
        F: FnOnce(WorkerProfile, SpawnOptions) -> Fut + Send + 'static,
        Fut: Future<Output = Result<WorkerInstance, String>> + Send + 'static,
    {
        let worker_id = profile.id.clone();
        if let Some(stale) = self.get(&worker_id).await
            && stale.status == WorkerStatus::Error
        {
            info!(worker_id = %worker_id, "Replacing errored worker");
            self.stop(&worker_id).await;
        }
        {
            // Checked again on registration; this only avoids spawning a
            // process that is certain to be rejected.
            let state = self.state.read().await;
            state.check_admission(&self.config, options.session_id.as_deref())?;
            state.check_rate_limit(&self.config)?;
        }

        info!(worker_id = %worker_id, "Spawning worker");
        let session_id = options.session_id.clone();
        let mut instance =
            spawn(profile, options)
                .await
                .map_err(|reason| RegistryError::SpawnFailed {
                    worker_id: worker_id.clone(),
                    reason,
                })?;
        if instance.session_id.is_none() {
            instance.session_id = session_id;
        }

        if let Err(e) = self.register(instance.clone()).await {
            warn!(worker_id = %worker_id, error = %e, "Registration failed, shutting down spawned worker");
            instance.shutdown().await;
            return Err(e);
        }

        Ok(self.get(&worker_id).await.unwrap_or(instance))
    }
}

//! Runtime worker instances.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use serde::Serialize;

use crate::worker::profile::WorkerProfile;
use crate::worker::state::{MAX_TRANSITIONS, StatusTransition, WorkerStatus};

/// Callback that tears down the worker's underlying process.
pub type ShutdownHook = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A running (or recently running) worker bound to a profile.
#[derive(Clone, Serialize)]
pub struct WorkerInstance {
    pub profile: WorkerProfile,
    pub status: WorkerStatus,
    pub endpoint: Option<String>,
    pub port: Option<u16>,
    pub pid: Option<u32>,
    /// Session that owns this instance.
    pub session_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub error: Option<String>,
    pub warning: Option<String>,
    pub transitions: Vec<StatusTransition>,
    #[serde(skip)]
    shutdown: Option<ShutdownHook>,
}

impl std::fmt::Debug for WorkerInstance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerInstance")
            .field("id", &self.profile.id)
            .field("status", &self.status)
            .field("endpoint", &self.endpoint)
            .field("pid", &self.pid)
            .field("session_id", &self.session_id)
            .field("has_shutdown", &self.shutdown.is_some())
            .finish()
    }
}

impl WorkerInstance {
    /// New instance in `starting` status.
    pub fn new(profile: WorkerProfile) -> Self {
        let now = Utc::now();
        Self {
            profile,
            status: WorkerStatus::Starting,
            endpoint: None,
            port: None,
            pid: None,
            session_id: None,
            started_at: now,
            last_activity: now,
            error: None,
            warning: None,
            transitions: Vec::new(),
            shutdown: None,
        }
    }

    /// Profile id; also the registry key.
    pub fn id(&self) -> &str {
        &self.profile.id
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>, port: u16) -> Self {
        self.endpoint = Some(endpoint.into());
        self.port = Some(port);
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_status(mut self, status: WorkerStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_shutdown(mut self, hook: ShutdownHook) -> Self {
        self.shutdown = Some(hook);
        self
    }

    /// Apply a status transition, recording it in the capped history.
    pub fn transition_to(
        &mut self,
        new_status: WorkerStatus,
        reason: Option<String>,
    ) -> Result<(), String> {
        if !self.status.can_transition_to(new_status) {
            return Err(format!(
                "Cannot transition from {} to {}",
                self.status, new_status
            ));
        }

        self.transitions.push(StatusTransition {
            from: self.status,
            to: new_status,
            timestamp: Utc::now(),
            reason: reason.clone(),
        });
        if self.transitions.len() > MAX_TRANSITIONS {
            let drain_count = self.transitions.len() - MAX_TRANSITIONS;
            self.transitions.drain(..drain_count);
        }

        self.status = new_status;
        self.last_activity = Utc::now();
        match new_status {
            WorkerStatus::Error => self.error = reason,
            WorkerStatus::Ready | WorkerStatus::Starting => self.error = None,
            _ => {}
        }

        Ok(())
    }

    /// Run the shutdown hook, if one is attached.
    pub async fn shutdown(&self) {
        if let Some(hook) = &self.shutdown {
            hook().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::profile::CapabilityKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn profile() -> WorkerProfile {
        WorkerProfile::new("coder", "Coder", CapabilityKind::Coder, "m")
    }

    #[test]
    fn transitions_record_history_and_error() {
        let mut worker = WorkerInstance::new(profile());
        worker.transition_to(WorkerStatus::Ready, None).unwrap();
        worker
            .transition_to(WorkerStatus::Error, Some("crashed".into()))
            .unwrap();
        assert_eq!(worker.error.as_deref(), Some("crashed"));
        assert!(worker.transition_to(WorkerStatus::Busy, None).is_err());
        worker.transition_to(WorkerStatus::Starting, None).unwrap();
        assert!(worker.error.is_none());
        assert_eq!(worker.transitions.len(), 3);
    }

    #[test]
    fn history_capped() {
        let mut worker = WorkerInstance::new(profile());
        worker.transition_to(WorkerStatus::Ready, None).unwrap();
        for _ in 0..150 {
            worker.transition_to(WorkerStatus::Busy, None).unwrap();
            worker.transition_to(WorkerStatus::Ready, None).unwrap();
        }
        assert_eq!(worker.transitions.len(), MAX_TRANSITIONS);
    }

    #[tokio::test]
    async fn shutdown_hook_runs() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let hook: ShutdownHook = Arc::new(move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        });
        let worker = WorkerInstance::new(profile()).with_shutdown(hook);
        worker.shutdown().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

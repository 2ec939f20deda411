//! Background task manager. Launches host sessions and discovers their
//! completion by polling.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::host::{HostEvent, HostPlatform, PromptRequest, SessionStatus, Toast, ToastVariant};
use super::task::{BackgroundTask, LaunchInput, TaskNotification, TaskStatus};
use crate::config::BackgroundConfig;
use crate::error::{BackgroundError, HostError};
use crate::limiter::ConcurrencyLimiter;
use crate::tracking::truncate_chars;

/// Characters of result/error text kept in a notification.
const NOTIFICATION_CHARS: usize = 200;

/// Tracks long-running conversational tasks on the host platform.
///
/// Slots are keyed by worker id. A single poller task runs while any task
/// is active and exits on its own once none remain.
pub struct BackgroundManager {
    config: BackgroundConfig,
    slot_timeout: Duration,
    host: Arc<dyn HostPlatform>,
    limiter: Arc<ConcurrencyLimiter>,
    tasks: RwLock<HashMap<Uuid, BackgroundTask>>,
    /// Host session id -> task id, for running tasks only.
    sessions: RwLock<HashMap<String, Uuid>>,
    /// Parent session id -> undelivered notifications.
    notifications: Mutex<HashMap<String, Vec<TaskNotification>>>,
    poller: Mutex<Option<JoinHandle<()>>>,
}

/// Finishes a launch whose future was dropped before it returned, so the
/// task does not stay pending and an unrecorded slot is given back.
struct LaunchGuard {
    manager: Option<Arc<BackgroundManager>>,
    id: Uuid,
    /// Slot acquired but not yet recorded on the task.
    slot: Option<String>,
}

impl LaunchGuard {
    fn disarm(&mut self) {
        self.manager = None;
    }
}

impl Drop for LaunchGuard {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let (id, slot) = (self.id, self.slot.take());
        runtime.spawn(async move {
            if let Some(key) = slot {
                manager.limiter.release(&key).await;
            }
            manager
                .finish(id, TaskStatus::Error, None, Some("Launch abandoned".to_string()))
                .await;
        });
    }
}

impl BackgroundManager {
    pub fn new(
        config: BackgroundConfig,
        host: Arc<dyn HostPlatform>,
        limiter: Arc<ConcurrencyLimiter>,
        slot_timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            slot_timeout,
            host,
            limiter,
            tasks: RwLock::new(HashMap::new()),
            sessions: RwLock::new(HashMap::new()),
            notifications: Mutex::new(HashMap::new()),
            poller: Mutex::new(None),
        })
    }

    /// Launch a task. Suspends while the worker's slots are saturated.
    pub async fn launch(self: &Arc<Self>, input: LaunchInput) -> Result<BackgroundTask, BackgroundError> {
        if !self.config.allowed_workers.iter().any(|w| w == &input.worker_id) {
            return Err(BackgroundError::WorkerNotAllowed {
                worker_id: input.worker_id,
            });
        }

        self.prune().await;

        let timeout = input.timeout.unwrap_or(self.config.default_task_timeout);
        let task = BackgroundTask::new(&input, timeout);
        let id = task.id;
        self.tasks.write().await.insert(id, task);
        debug!(task_id = %id, worker_id = %input.worker_id, "Background task queued");

        let mut guard = LaunchGuard {
            manager: Some(Arc::clone(self)),
            id,
            slot: None,
        };
        let key = input.worker_id.clone();
        if let Err(e) = self.limiter.acquire(&key, self.slot_timeout).await {
            guard.disarm();
            self.finish(id, TaskStatus::Error, None, Some(e.to_string())).await;
            return Err(e.into());
        }
        guard.slot = Some(key.clone());

        // Cancelled or timed out while queued for the slot.
        let admitted = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.concurrency_key = guard.slot.take();
                    Ok(())
                }
                Some(task) => Err(task.status.to_string()),
                None => Err("removed".to_string()),
            }
        };
        if let Err(status) = admitted {
            guard.disarm();
            self.limiter.release(&key).await;
            return Err(BackgroundError::AlreadyTerminal { id, status });
        }

        let session_id = match self.open_session(&input).await {
            Ok(session_id) => session_id,
            Err(e) => {
                guard.disarm();
                // The slot is held now, so finishing releases it.
                self.finish(id, TaskStatus::Error, None, Some(e.to_string())).await;
                return Err(e.into());
            }
        };

        let started = {
            let mut tasks = self.tasks.write().await;
            match tasks.get_mut(&id) {
                Some(task) if task.status == TaskStatus::Pending => {
                    task.status = TaskStatus::Running;
                    task.session_id = Some(session_id.clone());
                    task.started_at = Some(Utc::now());
                    Ok(task.clone())
                }
                Some(task) => Err(task.status.to_string()),
                None => Err("removed".to_string()),
            }
        };
        guard.disarm();
        let task = started.map_err(|status| BackgroundError::AlreadyTerminal { id, status })?;

        self.sessions.write().await.insert(session_id.clone(), id);
        self.ensure_polling().await;

        info!(
            task_id = %id,
            worker_id = %task.worker_id,
            session_id = %session_id,
            "Background task started"
        );
        self.toast(
            "Background task started",
            format!("{}: {}", task.worker_id, task.description),
            ToastVariant::Info,
        )
        .await;

        Ok(task)
    }

    async fn open_session(&self, input: &LaunchInput) -> Result<String, HostError> {
        let session_id = self
            .host
            .create_session(Some(&input.parent_session_id), &input.description)
            .await?;
        self.host
            .send_prompt(
                &session_id,
                PromptRequest {
                    agent: input.worker_id.clone(),
                    model: input.model.clone(),
                    text: input.prompt.clone(),
                    tools: Default::default(),
                },
            )
            .await?;
        Ok(session_id)
    }

    /// Run one poll tick over every active task.
    ///
    /// Timeouts are checked before completion, so a task that is both past
    /// its deadline and idle is recorded as timed out.
    pub async fn poll_once(&self) {
        self.prune().await;

        let active: Vec<BackgroundTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.status.is_terminal())
            .cloned()
            .collect();
        if active.is_empty() {
            return;
        }

        // Fetched at most once per tick, and only if a task needs it.
        let mut statuses: Option<HashMap<String, SessionStatus>> = None;
        let mut status_failed = false;

        for task in active {
            if task.is_timed_out() {
                let message = format!("Task timed out after {}s", task.timeout().as_secs());
                self.finish(task.id, TaskStatus::Timeout, None, Some(message))
                    .await;
                continue;
            }

            let Some(session_id) = task.session_id.as_deref() else {
                continue;
            };

            if statuses.is_none() && !status_failed {
                match self.host.session_statuses().await {
                    Ok(map) => statuses = Some(map),
                    Err(e) => {
                        warn!(error = %e, "Session status query failed");
                        status_failed = true;
                    }
                }
            }

            // Missing status means not yet known.
            let status = statuses.as_ref().and_then(|map| map.get(session_id));
            if status != Some(&SessionStatus::Idle) {
                continue;
            }

            match self.host.session_todos(session_id).await {
                Ok(todos) if todos.iter().all(|t| t.status.is_done()) => {
                    let result = self
                        .tasks
                        .read()
                        .await
                        .get(&task.id)
                        .and_then(|t| t.progress.last_message.clone());
                    self.finish(task.id, TaskStatus::Completed, result, None).await;
                }
                Ok(todos) => {
                    let outstanding = todos.iter().filter(|t| !t.status.is_done()).count();
                    debug!(task_id = %task.id, outstanding, "Session idle with open todos");
                }
                Err(e) => {
                    debug!(task_id = %task.id, error = %e, "Todo query failed");
                }
            }
        }
    }

    async fn ensure_polling(self: &Arc<Self>) {
        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }
        let manager = Arc::clone(self);
        *poller = Some(tokio::spawn(async move { manager.poll_loop().await }));
        debug!(interval = ?self.config.poll_interval, "Background poller started");
    }

    async fn poll_loop(self: Arc<Self>) {
        let mut interval = tokio::time::interval(self.config.poll_interval);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.poll_once().await;

            if self.active_count().await == 0 {
                // Re-checked under the poller lock so a concurrent launch
                // either sees this loop running or starts a new one.
                let mut poller = self.poller.lock().await;
                if self.active_count().await == 0 {
                    poller.take();
                    debug!("Background poller stopped");
                    break;
                }
            }
        }
    }

    /// Whether the poller is currently running.
    pub async fn is_polling(&self) -> bool {
        self.poller
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Move a task to a terminal status. Returns `None` if the task is
    /// unknown or already terminal.
    async fn finish(
        &self,
        id: Uuid,
        status: TaskStatus,
        result: Option<String>,
        error: Option<String>,
    ) -> Option<BackgroundTask> {
        let (task, slot) = {
            let mut tasks = self.tasks.write().await;
            let task = tasks.get_mut(&id)?;
            if task.status.is_terminal() {
                return None;
            }
            task.status = status;
            task.finished_at = Some(Utc::now());
            task.duration_ms = Some(task.elapsed().as_millis() as u64);
            task.result = result;
            task.error = error;
            let slot = task.concurrency_key.take();
            (task.clone(), slot)
        };

        if let Some(key) = slot {
            self.limiter.release(&key).await;
        }
        if let Some(session_id) = &task.session_id {
            self.sessions.write().await.remove(session_id);
        }

        match status {
            TaskStatus::Completed | TaskStatus::Cancelled => {
                info!(task_id = %id, status = %status, "Background task finished")
            }
            _ => warn!(
                task_id = %id,
                status = %status,
                error = task.error.as_deref().unwrap_or(""),
                "Background task failed"
            ),
        }

        let summary = task
            .result
            .as_deref()
            .or(task.error.as_deref())
            .map(|s| truncate_chars(s, NOTIFICATION_CHARS))
            .unwrap_or_default();
        {
            let mut notifications = self.notifications.lock().await;
            let queue = notifications
                .entry(task.parent_session_id.clone())
                .or_default();
            queue.push(TaskNotification {
                task_id: id,
                description: task.description.clone(),
                status,
                summary,
            });
            if queue.len() > self.config.max_notifications {
                let dropped = queue.len() - self.config.max_notifications;
                queue.drain(..dropped);
                debug!(
                    parent_session_id = %task.parent_session_id,
                    dropped,
                    "Dropped undelivered notifications"
                );
            }
        }

        let (title, variant) = match status {
            TaskStatus::Completed => ("Background task completed", ToastVariant::Success),
            TaskStatus::Cancelled => ("Background task cancelled", ToastVariant::Warning),
            TaskStatus::Timeout => ("Background task timed out", ToastVariant::Warning),
            _ => ("Background task failed", ToastVariant::Error),
        };
        self.toast(title, task.description.clone(), variant).await;

        Some(task)
    }

    async fn toast(&self, title: &str, message: String, variant: ToastVariant) {
        if let Err(e) = self.host.show_toast(Toast::new(title, message, variant)).await {
            debug!(error = %e, "Toast delivery failed");
        }
    }

    /// Cancel an active task. The host session itself is left alone.
    pub async fn cancel(&self, id: Uuid, reason: Option<String>) -> Result<BackgroundTask, BackgroundError> {
        let reason = reason.unwrap_or_else(|| "Cancelled".to_string());
        if let Some(task) = self.finish(id, TaskStatus::Cancelled, None, Some(reason)).await {
            return Ok(task);
        }
        match self.tasks.read().await.get(&id) {
            Some(task) => Err(BackgroundError::AlreadyTerminal {
                id,
                status: task.status.to_string(),
            }),
            None => Err(BackgroundError::NotFound { id }),
        }
    }

    /// Apply a host event to the task bound to its session.
    pub async fn handle_event(&self, event: &HostEvent) {
        let Some(id) = self.sessions.read().await.get(event.session_id()).copied() else {
            return;
        };

        match event {
            HostEvent::ToolPart { tool, .. } => {
                if let Some(task) = self.tasks.write().await.get_mut(&id) {
                    task.progress.tool_calls += 1;
                    task.progress.last_tool = Some(tool.clone());
                    task.progress.last_update = Some(Utc::now());
                }
            }
            HostEvent::TextPart { text, .. } => {
                if let Some(task) = self.tasks.write().await.get_mut(&id) {
                    task.progress.last_message = Some(text.clone());
                    task.progress.last_update = Some(Utc::now());
                }
            }
            HostEvent::SessionIdle { .. } => {
                debug!(task_id = %id, "Session reported idle");
            }
            HostEvent::SessionError { message, .. } => {
                self.finish(id, TaskStatus::Error, None, Some(message.clone()))
                    .await;
            }
            HostEvent::SessionDeleted { .. } => {
                self.finish(id, TaskStatus::Cancelled, None, Some("Session deleted".to_string()))
                    .await;
            }
        }
    }

    /// Decode and apply an untyped host event. Returns false if the payload
    /// was not recognised.
    pub async fn handle_raw_event(&self, payload: &Value) -> bool {
        match HostEvent::from_value(payload) {
            Some(event) => {
                self.handle_event(&event).await;
                true
            }
            None => false,
        }
    }

    /// Drain queued notifications for a parent session.
    pub async fn take_notifications(&self, parent_session_id: &str) -> Vec<TaskNotification> {
        self.notifications
            .lock()
            .await
            .remove(parent_session_id)
            .unwrap_or_default()
    }

    pub async fn get(&self, id: Uuid) -> Option<BackgroundTask> {
        self.tasks.read().await.get(&id).cloned()
    }

    /// Tasks, optionally limited to one parent session, oldest first.
    pub async fn list(&self, parent_session_id: Option<&str>) -> Vec<BackgroundTask> {
        let mut tasks: Vec<BackgroundTask> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| parent_session_id.is_none_or(|p| t.parent_session_id == p))
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub async fn active_count(&self) -> usize {
        self.tasks
            .read()
            .await
            .values()
            .filter(|t| !t.status.is_terminal())
            .count()
    }

    /// Evict finished tasks past the age limit, then the oldest finished
    /// tasks beyond the count limit. Active tasks are never evicted.
    pub async fn prune(&self) -> usize {
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        let now = Utc::now();
        let max_age = chrono::Duration::from_std(self.config.max_age)
            .unwrap_or(chrono::Duration::hours(1));

        tasks.retain(|_, task| {
            !task
                .finished_at
                .is_some_and(|finished| now.signed_duration_since(finished) > max_age)
        });

        let mut finished: Vec<(DateTime<Utc>, Uuid)> = tasks
            .values()
            .filter(|t| t.status.is_terminal())
            .filter_map(|t| t.finished_at.map(|f| (f, t.id)))
            .collect();
        if finished.len() > self.config.max_tasks {
            finished.sort();
            let excess = finished.len() - self.config.max_tasks;
            for (_, id) in finished.into_iter().take(excess) {
                tasks.remove(&id);
            }
        }

        let evicted = before - tasks.len();
        if evicted > 0 {
            debug!(count = evicted, "Evicted finished background tasks");
        }
        evicted
    }

    /// Cancel every active task and stop the poller.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.poller.lock().await.take() {
            handle.abort();
        }
        let active: Vec<Uuid> = self
            .tasks
            .read()
            .await
            .values()
            .filter(|t| !t.status.is_terminal())
            .map(|t| t.id)
            .collect();
        for id in &active {
            self.finish(*id, TaskStatus::Cancelled, None, Some("Manager shut down".to_string()))
                .await;
        }
        info!(cancelled = active.len(), "Background manager shut down");
    }
}

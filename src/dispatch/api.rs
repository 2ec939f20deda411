//! Task dispatch API over the worker registry and job ledger.
//!
//! Every operation is scoped to the requesting session. Jobs owned by another
//! session are reported as forbidden and their content is never returned.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::attachments::{append_attachment_list, validate_attachments};
use super::routing::TaskRouter;
use crate::config::DispatchConfig;
use crate::error::{DispatchError, LedgerError};
use crate::ledger::{Job, JobFilter, JobLedger, JobStatus};
use crate::tracking::{Trackable, render_table};
use crate::worker::{ProfileCatalog, SpawnOptions, WorkerInstance, WorkerProfile, WorkerRegistry, WorkerStatus};
use crate::workflow::{StepDispatcher, StepRequest, WorkerResolver};

/// Starts worker processes for profiles that are not running.
#[async_trait]
pub trait WorkerSpawner: Send + Sync {
    async fn spawn(&self, profile: WorkerProfile, options: SpawnOptions) -> Result<WorkerInstance, String>;
}

#[derive(Debug, Clone, Default)]
pub struct TaskStartRequest {
    pub task: String,
    /// Explicit worker profile; routed from the task text when absent.
    pub worker_id: Option<String>,
    pub attachments: Vec<String>,
    pub auto_spawn: Option<bool>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStarted {
    pub task_id: Uuid,
    pub worker_id: String,
    pub status: JobStatus,
    /// Why the worker was chosen, when it was routed.
    pub route_reason: Option<String>,
}

/// Result of reading one task on behalf of a session.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskLookup {
    Found {
        job: Job,
        /// Set by `task_await` when the shared deadline passed first.
        timed_out_waiting: bool,
    },
    Forbidden {
        task_id: Uuid,
    },
    Unknown {
        task_id: Uuid,
    },
}

impl TaskLookup {
    pub fn job(&self) -> Option<&Job> {
        match self {
            Self::Found { job, .. } => Some(job),
            _ => None,
        }
    }

    pub fn is_forbidden(&self) -> bool {
        matches!(self, Self::Forbidden { .. })
    }

    fn found(job: Job) -> Self {
        Self::Found {
            job,
            timed_out_waiting: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListView {
    #[default]
    Tasks,
    Workers,
    Profiles,
    Status,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListFormat {
    #[default]
    Json,
    Text,
}

#[derive(Debug, Clone, Default)]
pub struct TaskListQuery {
    pub view: ListView,
    pub status: Option<JobStatus>,
    pub worker_id: Option<String>,
    pub format: ListFormat,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TaskListing {
    Json(Value),
    Text(String),
}

enum RunFailure {
    Failed(String),
    TimedOut(Duration),
}

/// Composition layer exposing start/await/peek/list/cancel.
pub struct TaskDispatcher {
    config: DispatchConfig,
    project_root: PathBuf,
    registry: WorkerRegistry,
    ledger: Arc<JobLedger>,
    catalog: Arc<ProfileCatalog>,
    router: TaskRouter,
    spawner: Arc<dyn WorkerSpawner>,
    runner: Arc<dyn StepDispatcher>,
    /// Worker id -> tasks currently running on it.
    in_flight: Mutex<HashMap<String, usize>>,
}

impl TaskDispatcher {
    pub fn new(
        config: DispatchConfig,
        project_root: impl Into<PathBuf>,
        registry: WorkerRegistry,
        ledger: Arc<JobLedger>,
        catalog: Arc<ProfileCatalog>,
        spawner: Arc<dyn WorkerSpawner>,
        runner: Arc<dyn StepDispatcher>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            project_root: project_root.into(),
            registry,
            ledger,
            catalog,
            router: TaskRouter::default_rules(),
            spawner,
            runner,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Start a task and return its id without waiting for the result.
    pub async fn task_start(
        self: &Arc<Self>,
        session_id: &str,
        request: TaskStartRequest,
    ) -> Result<TaskStarted, DispatchError> {
        let task = request.task.trim();
        if task.is_empty() {
            return Err(DispatchError::EmptyTask);
        }
        validate_attachments(&self.project_root, &request.attachments)?;

        let (profile, route_reason) = match &request.worker_id {
            Some(worker_id) => {
                let profile = self.catalog.get(worker_id).cloned().ok_or_else(|| {
                    DispatchError::UnknownWorker {
                        worker_id: worker_id.clone(),
                    }
                })?;
                (profile, None)
            }
            None => {
                let (profile, decision) = self
                    .router
                    .select(&self.catalog, task, &request.attachments)
                    .ok_or_else(|| DispatchError::UnknownWorker {
                        worker_id: "coder".to_string(),
                    })?;
                (profile.clone(), Some(decision.reason))
            }
        };

        let auto_spawn = request.auto_spawn.unwrap_or(self.config.auto_spawn);
        let worker = self.resolve_worker(&profile, Some(session_id), auto_spawn).await?;

        let job = self
            .ledger
            .create(&profile.id, task, Some(session_id.to_string()))
            .await;

        let mut prompt = task.to_string();
        append_attachment_list(&mut prompt, &request.attachments);
        let step = StepRequest {
            worker_id: profile.id.clone(),
            prompt,
            attachments: request.attachments.clone(),
            timeout: request.timeout.unwrap_or(self.config.default_task_timeout),
        };

        let dispatcher = Arc::clone(self);
        let job_id = job.id;
        tokio::spawn(async move {
            match dispatcher.execute(&worker, step).await {
                Ok(response) => {
                    dispatcher.ledger.set_result(job_id, response).await;
                }
                Err(RunFailure::Failed(error)) => {
                    dispatcher.ledger.set_error(job_id, error).await;
                }
                Err(RunFailure::TimedOut(timeout)) => {
                    dispatcher
                        .ledger
                        .mark_timeout(job_id, format!("Task timed out after {}s", timeout.as_secs()))
                        .await;
                }
            }
        });

        info!(
            task_id = %job.id,
            worker_id = %profile.id,
            session_id = %session_id,
            routed = route_reason.is_some(),
            "Task started"
        );
        Ok(TaskStarted {
            task_id: job.id,
            worker_id: profile.id,
            status: job.status,
            route_reason,
        })
    }

    /// Wait for tasks to finish. All ids share one deadline.
    pub async fn task_await(
        &self,
        session_id: &str,
        task_ids: &[Uuid],
        timeout: Option<Duration>,
    ) -> Vec<TaskLookup> {
        let timeout = timeout.unwrap_or(self.config.default_await_timeout);
        let deadline = Instant::now() + timeout;
        let mut results = Vec::with_capacity(task_ids.len());

        for &id in task_ids {
            let lookup = self.lookup(session_id, id).await;
            let TaskLookup::Found { job, .. } = &lookup else {
                results.push(lookup);
                continue;
            };
            if job.status.is_terminal() {
                results.push(lookup);
                continue;
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            let outcome = match self.ledger.wait(id, remaining).await {
                Ok(job) => TaskLookup::found(job),
                Err(LedgerError::WaitTimeout { .. }) => match self.ledger.get(id).await {
                    Some(job) => TaskLookup::Found {
                        job,
                        timed_out_waiting: true,
                    },
                    None => TaskLookup::Unknown { task_id: id },
                },
                Err(LedgerError::NotFound { .. }) => TaskLookup::Unknown { task_id: id },
            };
            results.push(outcome);
        }
        results
    }

    /// Read tasks without waiting.
    pub async fn task_peek(&self, session_id: &str, task_ids: &[Uuid]) -> Vec<TaskLookup> {
        let mut results = Vec::with_capacity(task_ids.len());
        for &id in task_ids {
            results.push(self.lookup(session_id, id).await);
        }
        results
    }

    /// Mark tasks cancelled. The worker may still finish the work; its
    /// result is discarded.
    pub async fn task_cancel(
        &self,
        session_id: &str,
        task_ids: &[Uuid],
        reason: Option<String>,
    ) -> Vec<TaskLookup> {
        let mut results = Vec::with_capacity(task_ids.len());
        for &id in task_ids {
            let lookup = self.lookup(session_id, id).await;
            if lookup.job().is_some_and(|job| job.status == JobStatus::Running) {
                self.ledger.cancel(id, reason.clone()).await;
                info!(task_id = %id, session_id = %session_id, "Task cancelled");
                results.push(self.lookup(session_id, id).await);
            } else {
                results.push(lookup);
            }
        }
        results
    }

    /// List tasks, workers, profiles or a status summary.
    pub async fn task_list(&self, session_id: &str, query: &TaskListQuery) -> TaskListing {
        match query.view {
            ListView::Tasks => {
                let jobs = self
                    .ledger
                    .list(&JobFilter {
                        owner: Some(session_id.to_string()),
                        worker_id: query.worker_id.clone(),
                        status: query.status,
                    })
                    .await;
                match query.format {
                    ListFormat::Json => TaskListing::Json(serde_json::to_value(&jobs).unwrap_or_default()),
                    ListFormat::Text => TaskListing::Text(render_table(&jobs)),
                }
            }
            ListView::Workers => {
                let workers = self.registry.list().await;
                match query.format {
                    ListFormat::Json => {
                        TaskListing::Json(serde_json::to_value(&workers).unwrap_or_default())
                    }
                    ListFormat::Text => TaskListing::Text(render_workers(&workers)),
                }
            }
            ListView::Profiles => {
                let profiles = self.catalog.list();
                match query.format {
                    ListFormat::Json => {
                        TaskListing::Json(serde_json::to_value(&profiles).unwrap_or_default())
                    }
                    ListFormat::Text => TaskListing::Text(
                        profiles
                            .iter()
                            .map(|p| format!("{:<10} {:<10} {}", p.id, p.kind, p.purpose))
                            .collect::<Vec<_>>()
                            .join("\n"),
                    ),
                }
            }
            ListView::Status => {
                let jobs = self
                    .ledger
                    .list(&JobFilter {
                        owner: Some(session_id.to_string()),
                        ..Default::default()
                    })
                    .await;
                let running = jobs.iter().filter(|j| !j.is_terminal()).count();
                let workers = self.registry.active_count().await;
                match query.format {
                    ListFormat::Json => TaskListing::Json(json!({
                        "tasks": jobs.len(),
                        "running": running,
                        "finished": jobs.len() - running,
                        "active_workers": workers,
                        "profiles": self.catalog.len(),
                    })),
                    ListFormat::Text => TaskListing::Text(format!(
                        "tasks: {} ({} running)\nactive workers: {}\nprofiles: {}",
                        jobs.len(),
                        running,
                        workers,
                        self.catalog.len()
                    )),
                }
            }
        }
    }

    async fn lookup(&self, session_id: &str, id: Uuid) -> TaskLookup {
        match self.ledger.get(id).await {
            None => TaskLookup::Unknown { task_id: id },
            Some(job) if job.owner.as_deref() != Some(session_id) => {
                warn!(task_id = %id, session_id = %session_id, "Cross-session task access refused");
                TaskLookup::Forbidden { task_id: id }
            }
            Some(job) => TaskLookup::found(job),
        }
    }

    /// Return a live worker for `profile`, spawning one if allowed.
    async fn resolve_worker(
        &self,
        profile: &WorkerProfile,
        session_id: Option<&str>,
        auto_spawn: bool,
    ) -> Result<WorkerInstance, DispatchError> {
        let live = self
            .registry
            .get(&profile.id)
            .await
            .filter(|w| w.status.is_live());

        let instance = match live {
            Some(instance) => instance,
            None if !auto_spawn => {
                return Err(DispatchError::WorkerNotRunning {
                    worker_id: profile.id.clone(),
                });
            }
            None => {
                let spawner = Arc::clone(&self.spawner);
                let options = SpawnOptions {
                    session_id: session_id.map(str::to_string),
                    directory: Some(self.project_root.display().to_string()),
                };
                let spawned = self
                    .registry
                    .get_or_spawn(profile, options, move |profile, options| async move {
                        spawner.spawn(profile, options).await
                    })
                    .await?;
                if spawned.status == WorkerStatus::Starting {
                    self.registry
                        .update_status(&profile.id, WorkerStatus::Ready, None)
                        .await;
                }
                spawned
            }
        };

        if let Some(session_id) = session_id {
            self.registry.claim(session_id, &profile.id).await?;
        }
        Ok(self.registry.get(&profile.id).await.unwrap_or(instance))
    }

    /// Run a request on a worker under its timeout, keeping the worker
    /// busy while any request is in flight.
    async fn execute(&self, worker: &WorkerInstance, request: StepRequest) -> Result<String, RunFailure> {
        let worker_id = worker.id().to_string();
        let timeout = request.timeout;

        self.mark_busy(&worker_id).await;
        let outcome = tokio::time::timeout(timeout, self.runner.dispatch(worker, request)).await;
        self.mark_idle(&worker_id).await;

        match outcome {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(error)) => Err(RunFailure::Failed(error)),
            Err(_) => {
                warn!(worker_id = %worker_id, timeout_secs = timeout.as_secs(), "Worker request timed out");
                Err(RunFailure::TimedOut(timeout))
            }
        }
    }

    async fn mark_busy(&self, worker_id: &str) {
        let first = {
            let mut in_flight = self.in_flight.lock().await;
            let count = in_flight.entry(worker_id.to_string()).or_default();
            *count += 1;
            *count == 1
        };
        if first {
            self.registry
                .update_status(worker_id, WorkerStatus::Busy, None)
                .await;
        }
    }

    async fn mark_idle(&self, worker_id: &str) {
        let last = {
            let mut in_flight = self.in_flight.lock().await;
            match in_flight.get_mut(worker_id) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    in_flight.remove(worker_id);
                    true
                }
                None => false,
            }
        };
        if last {
            self.registry
                .update_status(worker_id, WorkerStatus::Ready, None)
                .await;
        }
    }
}

fn render_workers(workers: &[WorkerInstance]) -> String {
    if workers.is_empty() {
        return "(none)".to_string();
    }
    workers
        .iter()
        .map(|w| {
            format!(
                "{:<10} {:<8} {}",
                w.id(),
                w.status,
                w.session_id.as_deref().unwrap_or("-")
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[async_trait]
impl WorkerResolver for TaskDispatcher {
    async fn resolve(&self, worker_id: &str, auto_spawn: bool) -> Result<WorkerInstance, String> {
        let profile = self
            .catalog
            .get(worker_id)
            .ok_or_else(|| format!("unknown worker profile {worker_id}"))?;
        self.resolve_worker(profile, None, auto_spawn)
            .await
            .map_err(|e| e.to_string())
    }
}

#[async_trait]
impl StepDispatcher for TaskDispatcher {
    async fn dispatch(&self, worker: &WorkerInstance, request: StepRequest) -> Result<String, String> {
        debug!(worker_id = %worker.id(), "Dispatching workflow step");
        self.execute(worker, request).await.map_err(|failure| match failure {
            RunFailure::Failed(error) => error,
            RunFailure::TimedOut(timeout) => format!("step timed out after {}s", timeout.as_secs()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LedgerConfig, RegistryConfig};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Spawner {
        spawned: AtomicUsize,
    }

    #[async_trait]
    impl WorkerSpawner for Spawner {
        async fn spawn(&self, profile: WorkerProfile, _options: SpawnOptions) -> Result<WorkerInstance, String> {
            self.spawned.fetch_add(1, Ordering::SeqCst);
            Ok(WorkerInstance::new(profile))
        }
    }

    /// Echoes the prompt, fails on "fail", and hangs on "hang".
    struct EchoRunner;

    #[async_trait]
    impl StepDispatcher for EchoRunner {
        async fn dispatch(&self, worker: &WorkerInstance, request: StepRequest) -> Result<String, String> {
            if request.prompt.contains("hang") {
                std::future::pending::<()>().await;
            }
            if request.prompt.contains("fail") {
                return Err("worker exploded".to_string());
            }
            Ok(format!("{}: {}", worker.id(), request.prompt))
        }
    }

    struct Fixture {
        dispatcher: Arc<TaskDispatcher>,
        registry: WorkerRegistry,
        spawner: Arc<Spawner>,
        _root: tempfile::TempDir,
    }

    fn fixture(config: DispatchConfig) -> Fixture {
        let root = tempfile::tempdir().unwrap();
        std::fs::write(root.path().join("diagram.png"), [0u8; 4]).unwrap();
        let registry = WorkerRegistry::new(RegistryConfig {
            min_spawn_interval: Duration::ZERO,
            ..Default::default()
        });
        let spawner = Arc::new(Spawner {
            spawned: AtomicUsize::new(0),
        });
        let dispatcher = TaskDispatcher::new(
            config,
            root.path(),
            registry.clone(),
            Arc::new(JobLedger::new(LedgerConfig::default())),
            Arc::new(ProfileCatalog::with_builtins()),
            spawner.clone(),
            Arc::new(EchoRunner),
        );
        Fixture {
            dispatcher,
            registry,
            spawner,
            _root: root,
        }
    }

    fn start(task: &str) -> TaskStartRequest {
        TaskStartRequest {
            task: task.into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn start_then_await_succeeds() {
        let f = fixture(DispatchConfig::default());
        let started = f.dispatcher.task_start("s1", start("fix the bug")).await.unwrap();
        assert_eq!(started.worker_id, "coder");
        assert_eq!(started.status, JobStatus::Running);

        let results = f.dispatcher.task_await("s1", &[started.task_id], None).await;
        let job = results[0].job().unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.result.as_deref(), Some("coder: fix the bug"));
        assert_eq!(f.spawner.spawned.load(Ordering::SeqCst), 1);
        assert_eq!(f.registry.claims("s1").await, vec!["coder".to_string()]);
        assert_eq!(f.registry.get("coder").await.unwrap().status, WorkerStatus::Ready);
    }

    #[tokio::test]
    async fn image_attachment_routes_to_vision() {
        let f = fixture(DispatchConfig::default());
        let started = f
            .dispatcher
            .task_start(
                "s1",
                TaskStartRequest {
                    task: "what is wrong with this layout".into(),
                    attachments: vec!["diagram.png".into()],
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(started.worker_id, "vision");
        assert_eq!(started.route_reason.as_deref(), Some("image attachment"));
    }

    #[tokio::test]
    async fn cross_session_access_is_forbidden() {
        let f = fixture(DispatchConfig::default());
        let started = f.dispatcher.task_start("owner", start("secret work")).await.unwrap();
        let id = started.task_id;

        let peek = f.dispatcher.task_peek("intruder", &[id]).await;
        assert!(peek[0].is_forbidden());
        let waited = f.dispatcher.task_await("intruder", &[id], None).await;
        assert!(waited[0].is_forbidden());
        let cancelled = f.dispatcher.task_cancel("intruder", &[id], None).await;
        assert!(cancelled[0].is_forbidden());

        let payload = serde_json::to_string(&peek[0]).unwrap();
        assert!(!payload.contains("secret work"));

        let owner_view = f.dispatcher.task_await("owner", &[id], None).await;
        assert_eq!(owner_view[0].job().unwrap().status, JobStatus::Succeeded);
    }

    #[tokio::test]
    async fn unknown_ids_and_failures_are_structured() {
        let f = fixture(DispatchConfig::default());
        let missing = Uuid::new_v4();
        let peek = f.dispatcher.task_peek("s1", &[missing]).await;
        assert!(matches!(peek[0], TaskLookup::Unknown { task_id } if task_id == missing));

        let started = f.dispatcher.task_start("s1", start("please fail")).await.unwrap();
        let results = f.dispatcher.task_await("s1", &[started.task_id], None).await;
        let job = results[0].job().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("worker exploded"));
    }

    #[tokio::test(start_paused = true)]
    async fn await_shares_one_deadline() {
        let f = fixture(DispatchConfig::default());
        let a = f.dispatcher.task_start("s1", start("hang here")).await.unwrap();
        let b = f.dispatcher.task_start("s1", start("hang there")).await.unwrap();

        let begin = Instant::now();
        let results = f
            .dispatcher
            .task_await("s1", &[a.task_id, b.task_id], Some(Duration::from_secs(5)))
            .await;
        assert!(begin.elapsed() < Duration::from_secs(6));

        for result in &results {
            match result {
                TaskLookup::Found {
                    job,
                    timed_out_waiting,
                } => {
                    assert_eq!(job.status, JobStatus::Running);
                    assert!(timed_out_waiting);
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn task_timeout_is_distinct_from_failure() {
        let f = fixture(DispatchConfig::default());
        let started = f
            .dispatcher
            .task_start(
                "s1",
                TaskStartRequest {
                    task: "hang forever".into(),
                    timeout: Some(Duration::from_secs(2)),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let results = f
            .dispatcher
            .task_await("s1", &[started.task_id], Some(Duration::from_secs(10)))
            .await;
        assert_eq!(results[0].job().unwrap().status, JobStatus::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_marks_running_task() {
        let f = fixture(DispatchConfig::default());
        let started = f.dispatcher.task_start("s1", start("hang")).await.unwrap();

        let results = f
            .dispatcher
            .task_cancel("s1", &[started.task_id], Some("changed my mind".into()))
            .await;
        let job = results[0].job().unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error.as_deref(), Some("changed my mind"));
    }

    #[tokio::test]
    async fn start_validates_input() {
        let f = fixture(DispatchConfig {
            auto_spawn: false,
            ..Default::default()
        });
        assert!(matches!(
            f.dispatcher.task_start("s1", start("  ")).await,
            Err(DispatchError::EmptyTask)
        ));

        let mut unknown = start("x");
        unknown.worker_id = Some("nobody".into());
        assert!(matches!(
            f.dispatcher.task_start("s1", unknown).await,
            Err(DispatchError::UnknownWorker { .. })
        ));

        let mut escape = start("x");
        escape.attachments = vec!["../etc/passwd".into()];
        assert!(matches!(
            f.dispatcher.task_start("s1", escape).await,
            Err(DispatchError::Attachment(_))
        ));

        assert!(matches!(
            f.dispatcher.task_start("s1", start("fix it")).await,
            Err(DispatchError::WorkerNotRunning { .. })
        ));
    }

    #[tokio::test]
    async fn list_views_are_session_scoped() {
        let f = fixture(DispatchConfig::default());
        let mine = f.dispatcher.task_start("s1", start("mine")).await.unwrap();
        let theirs = f.dispatcher.task_start("s2", start("theirs")).await.unwrap();
        f.dispatcher.task_await("s1", &[mine.task_id], None).await;
        f.dispatcher.task_await("s2", &[theirs.task_id], None).await;

        let TaskListing::Json(Value::Array(tasks)) = f
            .dispatcher
            .task_list("s1", &TaskListQuery::default())
            .await
        else {
            panic!("expected a JSON array");
        };
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0]["message"], "mine");

        let TaskListing::Text(text) = f
            .dispatcher
            .task_list(
                "s1",
                &TaskListQuery {
                    format: ListFormat::Text,
                    ..Default::default()
                },
            )
            .await
        else {
            panic!("expected text");
        };
        assert!(text.contains(&mine.task_id.to_string()));
        assert!(!text.contains(&theirs.task_id.to_string()));

        let TaskListing::Json(status) = f
            .dispatcher
            .task_list(
                "s1",
                &TaskListQuery {
                    view: ListView::Status,
                    ..Default::default()
                },
            )
            .await
        else {
            panic!("expected JSON");
        };
        assert_eq!(status["tasks"], 1);
        assert_eq!(status["profiles"], 5);

        let TaskListing::Text(profiles) = f
            .dispatcher
            .task_list(
                "s1",
                &TaskListQuery {
                    view: ListView::Profiles,
                    format: ListFormat::Text,
                    ..Default::default()
                },
            )
            .await
        else {
            panic!("expected text");
        };
        assert!(profiles.contains("explorer"));
    }

    #[tokio::test]
    async fn resolver_spawns_for_workflows() {
        let f = fixture(DispatchConfig::default());
        let worker = f.dispatcher.resolve("architect", true).await.unwrap();
        assert_eq!(worker.id(), "architect");
        assert!(f.dispatcher.resolve("nobody", true).await.is_err());

        let response = f
            .dispatcher
            .dispatch(
                &worker,
                StepRequest {
                    worker_id: "architect".into(),
                    prompt: "plan".into(),
                    attachments: Vec::new(),
                    timeout: Duration::from_secs(5),
                },
            )
            .await
            .unwrap();
        assert_eq!(response, "architect: plan");
    }
}

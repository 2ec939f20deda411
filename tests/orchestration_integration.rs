//! Integration tests for the composed orchestration core.
//!
//! Each test wires the registry, ledger, dispatcher, workflow engine and
//! background manager together with stub host and worker implementations.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;

use agent_pool::OrchestratorConfig;
use agent_pool::background::{
    BackgroundManager, HostPlatform, LaunchInput, PromptRequest, SessionStatus, SessionTodo,
    TaskStatus, Toast,
};
use agent_pool::dispatch::{TaskDispatcher, TaskStartRequest, WorkerSpawner};
use agent_pool::error::HostError;
use agent_pool::ledger::{JobLedger, JobStatus};
use agent_pool::limiter::ConcurrencyLimiter;
use agent_pool::tracking::render_table;
use agent_pool::worker::{
    ProfileCatalog, RegistryEvent, SpawnOptions, WorkerInstance, WorkerProfile, WorkerRegistry,
    WorkerStatus,
};
use agent_pool::workflow::{
    RunStatus, StepDispatcher, StepRequest, WorkflowCatalog, WorkflowEngine, WorkflowRunInput,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Spawner that hands back a fresh instance with a fake pid.
struct StubSpawner;

#[async_trait]
impl WorkerSpawner for StubSpawner {
    async fn spawn(&self, profile: WorkerProfile, _options: SpawnOptions) -> Result<WorkerInstance, String> {
        Ok(WorkerInstance::new(profile).with_pid(4242))
    }
}

/// Worker that answers with a structured report naming itself.
struct ReportingWorker;

#[async_trait]
impl StepDispatcher for ReportingWorker {
    async fn dispatch(&self, worker: &WorkerInstance, request: StepRequest) -> Result<String, String> {
        let first_line = request.prompt.lines().next().unwrap_or("").to_string();
        Ok(format!(
            "## Summary\n{} handled: {first_line}\n## Artifacts\nsrc/{}.rs",
            worker.id(),
            worker.id()
        ))
    }
}

struct Harness {
    config: OrchestratorConfig,
    registry: WorkerRegistry,
    ledger: Arc<JobLedger>,
    dispatcher: Arc<TaskDispatcher>,
    root: tempfile::TempDir,
}

fn harness() -> Harness {
    init_tracing();

    let mut config = OrchestratorConfig::default();
    let overrides: HashMap<&str, &str> = HashMap::from([
        ("AGENT_POOL_MIN_SPAWN_INTERVAL_MS", "0"),
        ("AGENT_POOL_MAX_CARRY_CHARS", "2000"),
    ]);
    config.apply_overrides(|key| overrides.get(key).map(|v| v.to_string()));
    config.validate().unwrap();

    let root = tempfile::tempdir().unwrap();
    let registry = WorkerRegistry::new(config.registry.clone());
    let ledger = Arc::new(JobLedger::new(config.ledger.clone()));
    let dispatcher = TaskDispatcher::new(
        config.dispatch.clone(),
        root.path(),
        registry.clone(),
        Arc::clone(&ledger),
        Arc::new(ProfileCatalog::with_builtins()),
        Arc::new(StubSpawner),
        Arc::new(ReportingWorker),
    );

    Harness {
        config,
        registry,
        ledger,
        dispatcher,
        root,
    }
}

#[tokio::test]
async fn workflow_runs_through_dispatcher() {
    let h = harness();
    std::fs::write(h.root.path().join("crash.log"), "panic at src/main.rs").unwrap();

    let engine = WorkflowEngine::new(
        WorkflowCatalog::with_builtins(),
        h.config.workflow.clone(),
        h.root.path(),
        h.dispatcher.clone(),
        h.dispatcher.clone(),
    );

    let result = timeout(
        TEST_TIMEOUT,
        engine.run(WorkflowRunInput {
            workflow_id: "investigate-fix".into(),
            task: "The CLI panics on empty input".into(),
            attachments: vec!["crash.log".into()],
            ..Default::default()
        }),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.steps.len(), 2);
    assert_eq!(result.steps[0].worker_id, "explorer");
    assert_eq!(result.steps[1].worker_id, "coder");
    assert!(result.carry.contains("### Investigate"));
    assert!(result.carry.contains("Artifacts: src/explorer.rs"));
    assert!(result.carry.contains("### Fix"));
    assert!(result.carry.chars().count() <= 2000);

    for worker_id in ["explorer", "coder"] {
        let worker = h.registry.get(worker_id).await.unwrap();
        assert_eq!(worker.status, WorkerStatus::Ready);
        assert_eq!(worker.pid, Some(4242));
    }
}

#[tokio::test]
async fn dispatch_emits_registry_events() {
    let h = harness();
    let mut events = h.registry.subscribe();

    let started = h
        .dispatcher
        .task_start(
            "session-a",
            TaskStartRequest {
                task: "Where is the config parsed?".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(started.worker_id, "explorer");

    let results = timeout(
        TEST_TIMEOUT,
        h.dispatcher.task_await("session-a", &[started.task_id], None),
    )
    .await
    .unwrap();
    assert_eq!(results[0].job().unwrap().status, JobStatus::Succeeded);

    let first = events.recv().await.unwrap();
    assert_eq!(
        first,
        RegistryEvent::Spawned {
            worker_id: "explorer".into()
        }
    );
    let mut transitions = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let RegistryEvent::StatusChanged { to, .. } = event {
            transitions.push(to);
        }
    }
    assert_eq!(
        transitions,
        vec![WorkerStatus::Ready, WorkerStatus::Busy, WorkerStatus::Ready]
    );

    assert_eq!(h.registry.release_session("session-a").await, 1);
    assert!(h.registry.get("explorer").await.is_none());
    assert_eq!(h.ledger.stats().await.succeeded, 1);
}

#[derive(Default)]
struct IdleHost {
    sessions: Mutex<Vec<String>>,
}

#[async_trait]
impl HostPlatform for IdleHost {
    async fn create_session(&self, _parent_id: Option<&str>, _title: &str) -> Result<String, HostError> {
        let mut sessions = self.sessions.lock().unwrap();
        let id = format!("ses_{}", sessions.len() + 1);
        sessions.push(id.clone());
        Ok(id)
    }

    async fn send_prompt(&self, _session_id: &str, _prompt: PromptRequest) -> Result<(), HostError> {
        Ok(())
    }

    async fn session_statuses(&self) -> Result<HashMap<String, SessionStatus>, HostError> {
        Ok(self
            .sessions
            .lock()
            .unwrap()
            .iter()
            .map(|s| (s.clone(), SessionStatus::Idle))
            .collect())
    }

    async fn session_todos(&self, _session_id: &str) -> Result<Vec<SessionTodo>, HostError> {
        Ok(Vec::new())
    }

    async fn show_toast(&self, _toast: Toast) -> Result<(), HostError> {
        Err(HostError::RequestFailed {
            operation: "toast".into(),
            reason: "no UI attached".into(),
        })
    }
}

#[tokio::test]
async fn background_tasks_complete_and_notify() {
    let h = harness();
    let limiter = Arc::new(ConcurrencyLimiter::new(&h.config.limiter));
    let manager = BackgroundManager::new(
        h.config.background.clone(),
        Arc::new(IdleHost::default()),
        Arc::clone(&limiter),
        h.config.limiter.acquire_timeout,
    );

    let mut ids = Vec::new();
    for description in ["map the modules", "list the entry points"] {
        let task = manager
            .launch(LaunchInput {
                worker_id: "explorer".into(),
                description: description.into(),
                prompt: description.into(),
                parent_session_id: "parent".into(),
                ..Default::default()
            })
            .await
            .unwrap();
        ids.push(task.id);
    }
    assert_eq!(limiter.active("explorer").await, 2);

    manager.poll_once().await;

    let tasks = manager.list(Some("parent")).await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Completed));
    assert_eq!(limiter.active("explorer").await, 0);

    let table = render_table(&tasks);
    for id in &ids {
        assert!(table.contains(&id.to_string()));
    }
    assert_eq!(manager.take_notifications("parent").await.len(), 2);
    assert_eq!(manager.active_count().await, 0);
}

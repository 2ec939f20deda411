//! Workflow execution.
//!
//! Steps run strictly in order. Each step's prompt is rendered from the task
//! and the carry built by the steps before it. Worker resolution and step
//! dispatch are injected so the engine can be driven without a host.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use super::carry::Carry;
use super::definition::{WorkflowCatalog, WorkflowDefinition, WorkflowStepDefinition};
use crate::config::WorkflowLimits;
use crate::dispatch::attachments::{append_attachment_list, validate_attachments};
use crate::error::WorkflowError;
use crate::worker::WorkerInstance;

/// A prompt bound for one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRequest {
    pub worker_id: String,
    pub prompt: String,
    pub attachments: Vec<String>,
    /// Upper bound the dispatcher must enforce.
    pub timeout: Duration,
}

/// Finds (or spawns) the worker that runs a step.
#[async_trait]
pub trait WorkerResolver: Send + Sync {
    async fn resolve(&self, worker_id: &str, auto_spawn: bool) -> Result<WorkerInstance, String>;
}

/// Sends a step prompt to a worker and returns its response text.
#[async_trait]
pub trait StepDispatcher: Send + Sync {
    async fn dispatch(&self, worker: &WorkerInstance, request: StepRequest) -> Result<String, String>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStepResult {
    pub step_id: String,
    pub title: String,
    pub worker_id: String,
    pub status: StepStatus,
    pub response: Option<String>,
    pub warning: Option<String>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowRunResult {
    pub run_id: Uuid,
    pub workflow_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub steps: Vec<WorkflowStepResult>,
    /// Carry after the last executed step.
    pub carry: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

/// Input for a full run.
#[derive(Debug, Clone, Default)]
pub struct WorkflowRunInput {
    pub workflow_id: String,
    pub task: String,
    pub attachments: Vec<String>,
    /// Defaults to spawning missing workers.
    pub auto_spawn: Option<bool>,
    /// Overrides the engine's limits for this run.
    pub limits: Option<WorkflowLimits>,
}

/// Input for running a single step against an existing carry.
#[derive(Debug, Clone, Default)]
pub struct WorkflowStepInput {
    pub workflow_id: String,
    pub step_index: i64,
    pub task: String,
    pub carry: String,
    pub attachments: Vec<String>,
    pub auto_spawn: Option<bool>,
    pub limits: Option<WorkflowLimits>,
}

#[derive(Debug, Clone, Serialize)]
pub struct WorkflowStepOutcome {
    pub step: WorkflowStepResult,
    pub carry: String,
}

pub struct WorkflowEngine {
    catalog: WorkflowCatalog,
    limits: WorkflowLimits,
    project_root: PathBuf,
    resolver: Arc<dyn WorkerResolver>,
    dispatcher: Arc<dyn StepDispatcher>,
}

impl WorkflowEngine {
    pub fn new(
        catalog: WorkflowCatalog,
        limits: WorkflowLimits,
        project_root: impl Into<PathBuf>,
        resolver: Arc<dyn WorkerResolver>,
        dispatcher: Arc<dyn StepDispatcher>,
    ) -> Self {
        Self {
            catalog,
            limits,
            project_root: project_root.into(),
            resolver,
            dispatcher,
        }
    }

    pub fn catalog(&self) -> &WorkflowCatalog {
        &self.catalog
    }

    /// Requested step timeout, clamped to the per-step ceiling.
    pub fn step_timeout(step: &WorkflowStepDefinition, limits: &WorkflowLimits) -> Duration {
        step.timeout
            .unwrap_or(limits.default_step_timeout)
            .min(limits.max_step_timeout)
    }

    /// Checks that must all pass before any step runs.
    fn preflight(
        &self,
        workflow_id: &str,
        task: &str,
        attachments: &[String],
        limits: &WorkflowLimits,
    ) -> Result<&WorkflowDefinition, WorkflowError> {
        let workflow = self
            .catalog
            .get(workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow {
                id: workflow_id.to_string(),
            })?;

        if workflow.steps.is_empty() {
            return Err(WorkflowError::NoSteps {
                id: workflow.id.clone(),
            });
        }
        if workflow.steps.len() > limits.max_steps {
            return Err(WorkflowError::TooManySteps {
                count: workflow.steps.len(),
                max: limits.max_steps,
            });
        }
        if task.trim().is_empty() {
            return Err(WorkflowError::EmptyTask);
        }
        let len = task.chars().count();
        if len > limits.max_task_chars {
            return Err(WorkflowError::TaskTooLong {
                len,
                max: limits.max_task_chars,
            });
        }
        validate_attachments(&self.project_root, attachments)?;

        Ok(workflow)
    }

    /// Run every step of a workflow. Dispatch failures stop the run and are
    /// reported in the result; only pre-flight failures return `Err`.
    pub async fn run(&self, input: WorkflowRunInput) -> Result<WorkflowRunResult, WorkflowError> {
        let limits = input.limits.unwrap_or_else(|| self.limits.clone());
        let workflow = self.preflight(&input.workflow_id, &input.task, &input.attachments, &limits)?;
        let auto_spawn = input.auto_spawn.unwrap_or(true);

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!(run_id = %run_id, workflow_id = %workflow.id, steps = workflow.steps.len(), "Workflow started");

        let mut carry = Carry::new(limits.max_carry_chars);
        let mut steps = Vec::with_capacity(workflow.steps.len());
        for step in &workflow.steps {
            let result = self
                .run_step(step, &input.task, &mut carry, &input.attachments, auto_spawn, &limits)
                .await;
            let failed = result.status == StepStatus::Error;
            steps.push(result);
            if failed {
                warn!(run_id = %run_id, step_id = %step.id, "Workflow halted after step failure");
                break;
            }
        }

        let status = if steps.iter().any(|s| s.status == StepStatus::Error) {
            RunStatus::Error
        } else {
            RunStatus::Success
        };
        info!(run_id = %run_id, workflow_id = %workflow.id, ?status, "Workflow finished");

        Ok(WorkflowRunResult {
            run_id,
            workflow_id: workflow.id.clone(),
            workflow_name: workflow.name.clone(),
            status,
            steps,
            carry: carry.render(),
            started_at,
            finished_at: Utc::now(),
        })
    }

    /// Run one step against a caller-held carry.
    pub async fn execute_step(&self, input: WorkflowStepInput) -> Result<WorkflowStepOutcome, WorkflowError> {
        let limits = input.limits.unwrap_or_else(|| self.limits.clone());
        let workflow = self
            .catalog
            .get(&input.workflow_id)
            .ok_or_else(|| WorkflowError::UnknownWorkflow {
                id: input.workflow_id.clone(),
            })?;

        let len = workflow.steps.len();
        let step = usize::try_from(input.step_index)
            .ok()
            .and_then(|i| workflow.steps.get(i))
            .ok_or(WorkflowError::InvalidStepIndex {
                index: input.step_index,
                len,
            })?;

        self.preflight(&input.workflow_id, &input.task, &input.attachments, &limits)?;

        let mut carry = Carry::parse(&input.carry, limits.max_carry_chars);
        let result = self
            .run_step(
                step,
                &input.task,
                &mut carry,
                &input.attachments,
                input.auto_spawn.unwrap_or(true),
                &limits,
            )
            .await;

        Ok(WorkflowStepOutcome {
            step: result,
            carry: carry.render(),
        })
    }

    async fn run_step(
        &self,
        step: &WorkflowStepDefinition,
        task: &str,
        carry: &mut Carry,
        attachments: &[String],
        auto_spawn: bool,
        limits: &WorkflowLimits,
    ) -> WorkflowStepResult {
        let started_at = Utc::now();
        let clock = tokio::time::Instant::now();

        let mut prompt = step.render(task, &carry.render());
        append_attachment_list(&mut prompt, attachments);
        let timeout = Self::step_timeout(step, limits);
        info!(step_id = %step.id, worker_id = %step.worker_id, timeout_secs = timeout.as_secs(), "Workflow step started");

        let outcome = match self.resolver.resolve(&step.worker_id, auto_spawn).await {
            Ok(worker) => {
                let request = StepRequest {
                    worker_id: worker.id().to_string(),
                    prompt,
                    attachments: attachments.to_vec(),
                    timeout,
                };
                self.dispatcher.dispatch(&worker, request).await
            }
            Err(e) => Err(format!("could not resolve worker {}: {e}", step.worker_id)),
        };

        let mut result = WorkflowStepResult {
            step_id: step.id.clone(),
            title: step.title.clone(),
            worker_id: step.worker_id.clone(),
            status: StepStatus::Success,
            response: None,
            warning: None,
            error: None,
            started_at,
            finished_at: started_at,
            duration_ms: 0,
        };

        match outcome {
            Ok(response) => {
                if response.trim().is_empty() {
                    result.warning = Some("worker returned an empty response".to_string());
                }
                if step.carry {
                    carry.append(&step.title, &response);
                }
                result.response = Some(response);
            }
            Err(error) => {
                warn!(step_id = %step.id, error = %error, "Workflow step failed");
                result.status = StepStatus::Error;
                result.error = Some(error);
            }
        }

        result.finished_at = Utc::now();
        result.duration_ms = clock.elapsed().as_millis() as u64;
        info!(step_id = %step.id, status = ?result.status, duration_ms = result.duration_ms, "Workflow step finished");
        result
    }
}

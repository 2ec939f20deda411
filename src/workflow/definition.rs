//! Static workflow definitions and the built-in catalog.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::RegistryError;
use crate::worker::profile::validate_profile_id;

/// One step of a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStepDefinition {
    pub id: String,
    pub title: String,
    /// Target worker profile id.
    pub worker_id: String,
    /// Prompt template with `{task}` and `{carry}` placeholders.
    pub prompt: String,
    /// Whether this step's output is compacted into the carry.
    pub carry: bool,
    pub timeout: Option<Duration>,
}

impl WorkflowStepDefinition {
    pub fn new(
        id: impl Into<String>,
        title: impl Into<String>,
        worker_id: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            worker_id: worker_id.into(),
            prompt: prompt.into(),
            carry: true,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn without_carry(mut self) -> Self {
        self.carry = false;
        self
    }

    /// Substitute `{task}` and `{carry}` into the template.
    pub fn render(&self, task: &str, carry: &str) -> String {
        render_template(&self.prompt, task, carry)
    }
}

/// An ordered sequence of steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<WorkflowStepDefinition>,
}

/// Substitute `{task}` and `{carry}` in a single pass, so placeholder text
/// inside the task is never expanded again.
pub fn render_template(template: &str, task: &str, carry: &str) -> String {
    let mut out = String::with_capacity(template.len() + task.len() + carry.len());
    let mut rest = template;
    while let Some(start) = rest.find('{') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        if let Some(after) = tail.strip_prefix("{task}") {
            out.push_str(task);
            rest = after;
        } else if let Some(after) = tail.strip_prefix("{carry}") {
            out.push_str(carry);
            rest = after;
        } else {
            out.push('{');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// Workflows shipped with the crate.
pub fn builtin_workflows() -> Vec<WorkflowDefinition> {
    vec![
        WorkflowDefinition {
            id: "plan-implement-review".into(),
            name: "Plan, implement, review".into(),
            description: "Design an approach, implement it, then review the result.".into(),
            steps: vec![
                WorkflowStepDefinition::new(
                    "plan",
                    "Plan",
                    "architect",
                    "Plan the following task. Reply with Summary, Actions, Risks and Next \
                     sections.\n\nTask:\n{task}",
                ),
                WorkflowStepDefinition::new(
                    "implement",
                    "Implement",
                    "coder",
                    "Implement the task using the plan below. Report Summary, Artifacts and \
                     Risks.\n\nTask:\n{task}\n\nContext so far:\n{carry}",
                ),
                WorkflowStepDefinition::new(
                    "review",
                    "Review",
                    "architect",
                    "Review the implementation for correctness and risk.\n\nTask:\n{task}\n\n\
                     Context so far:\n{carry}",
                ),
            ],
        },
        WorkflowDefinition {
            id: "investigate-fix".into(),
            name: "Investigate and fix".into(),
            description: "Locate the cause of a problem, then fix it.".into(),
            steps: vec![
                WorkflowStepDefinition::new(
                    "investigate",
                    "Investigate",
                    "explorer",
                    "Find the code relevant to this problem. List files in Artifacts.\n\n\
                     Problem:\n{task}",
                ),
                WorkflowStepDefinition::new(
                    "fix",
                    "Fix",
                    "coder",
                    "Fix the problem using the findings below.\n\nProblem:\n{task}\n\n\
                     Findings:\n{carry}",
                ),
            ],
        },
    ]
}

/// Workflow definitions by id.
#[derive(Debug, Clone, Default)]
pub struct WorkflowCatalog {
    workflows: BTreeMap<String, WorkflowDefinition>,
}

impl WorkflowCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut catalog = Self::new();
        for workflow in builtin_workflows() {
            catalog.workflows.insert(workflow.id.clone(), workflow);
        }
        catalog
    }

    /// Add or replace a definition. Ids follow the profile id rules.
    pub fn insert(&mut self, workflow: WorkflowDefinition) -> Result<(), RegistryError> {
        validate_profile_id(&workflow.id)?;
        self.workflows.insert(workflow.id.clone(), workflow);
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<&WorkflowDefinition> {
        self.workflows.get(id)
    }

    pub fn list(&self) -> Vec<&WorkflowDefinition> {
        self.workflows.values().collect()
    }
}

//! Multi-step workflows with bounded context carryover.

pub mod carry;
pub mod definition;
pub mod engine;

pub use carry::{Carry, append_carry, compact_block};
pub use definition::{
    WorkflowCatalog, WorkflowDefinition, WorkflowStepDefinition, builtin_workflows,
};
pub use engine::{
    RunStatus, StepDispatcher, StepRequest, StepStatus, WorkerResolver, WorkflowEngine,
    WorkflowRunInput, WorkflowRunResult, WorkflowStepInput, WorkflowStepOutcome,
    WorkflowStepResult,
};

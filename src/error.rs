//! Error types for the agent pool.

use std::time::Duration;

use uuid::Uuid;

/// Top-level error type for the orchestration core.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Limiter error: {0}")]
    Limiter(#[from] LimiterError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),

    #[error("Background task error: {0}")]
    Background(#[from] BackgroundError),

    #[error("Workflow error: {0}")]
    Workflow(#[from] WorkflowError),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Worker registry errors.
///
/// `Clone` because a single in-flight spawn result is shared by every caller
/// waiting on the same profile.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Worker registry at capacity ({max} workers)")]
    AtCapacity { max: usize },

    #[error("Session {session_id} already owns the maximum of {max} workers")]
    SessionLimit { session_id: String, max: usize },

    #[error("Worker registration rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Worker {worker_id} is already registered")]
    AlreadyRegistered { worker_id: String },

    #[error("Worker {worker_id} not found")]
    NotFound { worker_id: String },

    #[error("Worker {worker_id} failed to spawn: {reason}")]
    SpawnFailed { worker_id: String, reason: String },

    #[error("Invalid profile id {id:?}: {reason}")]
    InvalidProfileId { id: String, reason: String },
}

/// Concurrency limiter errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LimiterError {
    #[error("Timed out after {timeout:?} waiting for a slot on {key}")]
    Timeout { key: String, timeout: Duration },

    #[error("Limiter was cleared while waiting for a slot on {key}")]
    Cleared { key: String },
}

/// Job ledger errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("Job {id} not found")]
    NotFound { id: Uuid },

    #[error("Timed out after {timeout:?} waiting for job {id}")]
    WaitTimeout { id: Uuid, timeout: Duration },
}

/// Errors reported by the host session platform.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HostError {
    #[error("Host {operation} failed: {reason}")]
    RequestFailed { operation: String, reason: String },
}

/// Background task manager errors.
#[derive(Debug, thiserror::Error)]
pub enum BackgroundError {
    #[error("Worker {worker_id} is not allowed to run background tasks")]
    WorkerNotAllowed { worker_id: String },

    #[error("Background task {id} not found")]
    NotFound { id: Uuid },

    #[error("Background task {id} is already {status}")]
    AlreadyTerminal { id: Uuid, status: String },

    #[error("Slot acquisition failed: {0}")]
    Slot(#[from] LimiterError),

    #[error("Host error: {0}")]
    Host(#[from] HostError),
}

/// Workflow engine errors. Run-level failures only; step failures are
/// recorded in the run result.
#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow {id} not found")]
    UnknownWorkflow { id: String },

    #[error("Task text is empty")]
    EmptyTask,

    #[error("Task text too long: {len} chars > {max}")]
    TaskTooLong { len: usize, max: usize },

    #[error("Workflow has too many steps: {count} > {max}")]
    TooManySteps { count: usize, max: usize },

    #[error("Workflow {id} has no steps")]
    NoSteps { id: String },

    #[error("invalid stepIndex {index} for workflow with {len} steps")]
    InvalidStepIndex { index: i64, len: usize },

    #[error("Attachment rejected: {0}")]
    Attachment(#[from] AttachmentError),
}

/// Attachment path validation failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttachmentError {
    #[error("Attachment path must be relative: {path}")]
    Absolute { path: String },

    #[error("Attachment path must not contain parent segments: {path}")]
    ParentSegment { path: String },

    #[error("Attachment path escapes the project root: {path}")]
    OutsideRoot { path: String },

    #[error("Attachment path is a symbolic link: {path}")]
    Symlink { path: String },

    #[error("Attachment path {path} could not be inspected: {reason}")]
    Io { path: String, reason: String },
}

/// Task dispatch errors for write operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Unknown worker profile: {worker_id}")]
    UnknownWorker { worker_id: String },

    #[error("Worker {worker_id} is not running and auto-spawn is disabled")]
    WorkerNotRunning { worker_id: String },

    #[error("Task text is empty")]
    EmptyTask,

    #[error("Attachment rejected: {0}")]
    Attachment(#[from] AttachmentError),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Result type alias for the agent pool.
pub type Result<T> = std::result::Result<T, Error>;

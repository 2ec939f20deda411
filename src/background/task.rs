//! Background task records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::tracking::Trackable;

/// Status of a background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for a concurrency slot or for the host session.
    Pending,
    Running,
    Completed,
    Error,
    Cancelled,
    Timeout,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Incrementally updated progress of a running task.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TaskProgress {
    /// Tool invocations seen on the session.
    pub tool_calls: u32,
    /// Name of the most recent tool.
    pub last_tool: Option<String>,
    /// Most recent text output; becomes the result on completion.
    pub last_message: Option<String>,
    /// When any of the above last changed.
    pub last_update: Option<DateTime<Utc>>,
}

/// Input for `BackgroundManager::launch`.
#[derive(Debug, Clone, Default)]
pub struct LaunchInput {
    pub worker_id: String,
    pub description: String,
    pub prompt: String,
    /// Session the task reports back to.
    pub parent_session_id: String,
    pub model: Option<String>,
    pub timeout: Option<Duration>,
}

/// A long-running conversational task tracked by polling.
#[derive(Debug, Clone, Serialize)]
pub struct BackgroundTask {
    /// Unique task ID.
    pub id: Uuid,
    /// Worker profile the session runs as.
    pub worker_id: String,
    /// Short description, used as the session title.
    pub description: String,
    /// Initial prompt sent to the session.
    pub prompt: String,
    /// Session that launched the task and receives its notifications.
    pub parent_session_id: String,
    /// Host session running the task, once created.
    pub session_id: Option<String>,
    /// Current status.
    pub status: TaskStatus,
    /// When the task was queued.
    pub created_at: DateTime<Utc>,
    /// When the host session was started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the task reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Time from queuing to the terminal status.
    pub duration_ms: Option<u64>,
    /// Final text output, set on completion.
    pub result: Option<String>,
    /// Failure, cancellation or timeout message.
    pub error: Option<String>,
    /// Incremental progress from host events.
    pub progress: TaskProgress,
    /// Limiter key of the held slot; cleared once the slot is released.
    pub concurrency_key: Option<String>,
    /// Deadline measured from launch.
    pub timeout_ms: u64,
    /// Monotonic launch time for timeout checks.
    #[serde(skip)]
    pub(crate) launched: Instant,
}

impl BackgroundTask {
    pub(crate) fn new(input: &LaunchInput, timeout: Duration) -> Self {
        Self {
            id: Uuid::new_v4(),
            worker_id: input.worker_id.clone(),
            description: input.description.clone(),
            prompt: input.prompt.clone(),
            parent_session_id: input.parent_session_id.clone(),
            session_id: None,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            result: None,
            error: None,
            progress: TaskProgress::default(),
            concurrency_key: None,
            timeout_ms: timeout.as_millis() as u64,
            launched: Instant::now(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Time since launch, measured on the runtime clock.
    pub fn elapsed(&self) -> Duration {
        self.launched.elapsed()
    }

    pub fn is_timed_out(&self) -> bool {
        self.elapsed() >= self.timeout()
    }
}

impl Trackable for BackgroundTask {
    fn tracking_id(&self) -> Uuid {
        self.id
    }

    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn owner(&self) -> Option<&str> {
        Some(&self.parent_session_id)
    }

    fn status_label(&self) -> String {
        self.status.to_string()
    }

    fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    fn summary(&self) -> Option<&str> {
        self.result
            .as_deref()
            .or(self.error.as_deref())
            .or(self.progress.last_message.as_deref())
    }
}

/// Queued completion notice for the parent session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskNotification {
    pub task_id: Uuid,
    pub description: String,
    pub status: TaskStatus,
    pub summary: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        for status in [
            TaskStatus::Completed,
            TaskStatus::Error,
            TaskStatus::Cancelled,
            TaskStatus::Timeout,
        ] {
            assert!(status.is_terminal());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_uses_runtime_clock() {
        let input = LaunchInput {
            worker_id: "explorer".into(),
            ..Default::default()
        };
        let task = BackgroundTask::new(&input, Duration::from_secs(10));
        assert!(!task.is_timed_out());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(task.is_timed_out());
    }
}

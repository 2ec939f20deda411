//! Host session platform boundary.
//!
//! The host runs a worker's model calls inside conversational sessions. It
//! offers no push completion events for sessions, so completion is inferred by
//! polling status and outstanding todos.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HostError;

/// Session status as reported by the host's bulk status query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Idle,
    Busy,
    Retry,
}

/// Status of an outstanding session todo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

impl TodoStatus {
    pub fn is_done(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// A sub-item tracked inside a host session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionTodo {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
}

/// Prompt sent into a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PromptRequest {
    /// Worker/agent that should handle the prompt.
    pub agent: String,
    pub model: Option<String>,
    pub text: String,
    /// Tool permission overrides (`tool name -> enabled`).
    pub tools: BTreeMap<String, bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastVariant {
    Info,
    Success,
    Warning,
    Error,
}

/// Best-effort UI notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Toast {
    pub title: String,
    pub message: String,
    pub variant: ToastVariant,
    pub duration: Duration,
}

impl Toast {
    pub fn new(title: impl Into<String>, message: impl Into<String>, variant: ToastVariant) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            variant,
            duration: Duration::from_secs(5),
        }
    }
}

/// Operations the orchestration core consumes from the host platform.
#[async_trait]
pub trait HostPlatform: Send + Sync {
    /// Create a session, optionally as a child of `parent_id`.
    async fn create_session(&self, parent_id: Option<&str>, title: &str)
    -> Result<String, HostError>;

    /// Send a prompt into a session. Returns once the host accepted it.
    async fn send_prompt(&self, session_id: &str, prompt: PromptRequest) -> Result<(), HostError>;

    /// Status of every known session. Sessions missing from the map have no
    /// known status.
    async fn session_statuses(&self) -> Result<HashMap<String, SessionStatus>, HostError>;

    /// Outstanding sub-items of a session.
    async fn session_todos(&self, session_id: &str) -> Result<Vec<SessionTodo>, HostError>;

    /// Show a toast. Failures are ignored by callers.
    async fn show_toast(&self, toast: Toast) -> Result<(), HostError>;
}

/// Typed view of the host's untyped event payloads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostEvent {
    SessionIdle { session_id: String },
    SessionError { session_id: String, message: String },
    SessionDeleted { session_id: String },
    ToolPart { session_id: String, tool: String },
    TextPart { session_id: String, text: String },
}

impl HostEvent {
    /// Decode an event payload. Unknown event types and payloads with
    /// missing or mistyped fields yield `None`.
    pub fn from_value(value: &Value) -> Option<Self> {
        let kind = value.get("type")?.as_str()?;
        let props = value.get("properties")?;

        match kind {
            "session.idle" => Some(Self::SessionIdle {
                session_id: str_field(props, "sessionID")?,
            }),
            "session.error" => {
                let session_id = str_field(props, "sessionID")?;
                let message = match props.get("error") {
                    Some(Value::String(s)) => s.clone(),
                    Some(err) => err
                        .get("message")
                        .and_then(Value::as_str)
                        .or_else(|| err.pointer("/data/message").and_then(Value::as_str))
                        .unwrap_or("unknown error")
                        .to_string(),
                    None => "unknown error".to_string(),
                };
                Some(Self::SessionError {
                    session_id,
                    message,
                })
            }
            "session.deleted" => Some(Self::SessionDeleted {
                session_id: props
                    .get("info")
                    .and_then(|info| str_field(info, "id"))
                    .or_else(|| str_field(props, "sessionID"))?,
            }),
            "message.part.updated" => {
                let part = props.get("part")?;
                let session_id = str_field(part, "sessionID")?;
                match part.get("type")?.as_str()? {
                    "tool" => Some(Self::ToolPart {
                        session_id,
                        tool: str_field(part, "tool")?,
                    }),
                    "text" => Some(Self::TextPart {
                        session_id,
                        text: str_field(part, "text")?,
                    }),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    pub fn session_id(&self) -> &str {
        match self {
            Self::SessionIdle { session_id }
            | Self::SessionError { session_id, .. }
            | Self::SessionDeleted { session_id }
            | Self::ToolPart { session_id, .. }
            | Self::TextPart { session_id, .. } => session_id,
        }
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

//! Background tasks on the host session platform.

pub mod host;
pub mod manager;
pub mod task;

pub use host::{
    HostEvent, HostPlatform, PromptRequest, SessionStatus, SessionTodo, Toast, ToastVariant,
    TodoStatus,
};
pub use manager::BackgroundManager;
pub use task::{BackgroundTask, LaunchInput, TaskNotification, TaskProgress, TaskStatus};

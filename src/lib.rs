//! Agent pool: task orchestration over a pool of specialized workers.
//!
//! Components, bottom-up:
//! - `worker`: profiles, lifecycle state machine and the instance registry
//! - `limiter`: per-key concurrency slots with FIFO waiters
//! - `ledger`: job tracking with awaitable completion
//! - `background`: host-session tasks whose completion is found by polling
//! - `workflow`: ordered multi-step runs with a bounded carry
//! - `dispatch`: session-scoped start/await/peek/list/cancel

pub mod background;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod ledger;
pub mod limiter;
pub mod tracking;
pub mod worker;
pub mod workflow;

pub use config::OrchestratorConfig;
pub use error::{Error, Result};

//! Task dispatch: start/await/peek/list/cancel over the registry and ledger.

pub mod api;
pub mod attachments;
pub mod routing;

pub use api::{
    ListFormat, ListView, TaskDispatcher, TaskListQuery, TaskListing, TaskLookup, TaskStartRequest,
    TaskStarted, WorkerSpawner,
};
pub use attachments::{is_image, validate_attachment, validate_attachments};
pub use routing::{RouteDecision, TaskRouter};

//! Worker profiles, lifecycle and the instance registry.
//!
//! - `profile`: static capability profiles and the profile catalog
//! - `state`: lifecycle state machine (Starting, Ready, Busy, Error, Stopped)
//! - `instance`: runtime worker instances with shutdown hooks
//! - `registry`: the instance map with admission control and spawn dedup

pub mod instance;
pub mod profile;
pub mod registry;
pub mod state;

pub use instance::{ShutdownHook, WorkerInstance};
pub use profile::{CapabilityKind, ProfileCatalog, WorkerProfile, builtin_profiles};
pub use registry::{RegistryEvent, SpawnOptions, WorkerRegistry};
pub use state::WorkerStatus;

//! `stepwise-engine`: resumable, time-boxed batch execution.
//!
//! One call to a coordinator's `invoke` is one host invocation: it loads (or
//! builds) the persisted manifest, works from the cursor until the deadline
//! or the end of the manifest, checkpoints what it produced and returns the
//! next [`stepwise_core::EpisodeState`] for the orchestrator to replay.

pub mod config;
pub mod coordinator;
pub mod lease;
pub mod manifest_loader;
pub mod pool;
pub mod store;

pub use config::{ConfigError, EngineConfig};
pub use coordinator::{CostModel, EpisodeCoordinator, EpisodeFault, FanOutCoordinator, InvocationResult};
pub use lease::{InMemoryLease, Lease, LeaseError, NoLease, DEFAULT_LEASE_TTL};
pub use manifest_loader::ManifestLoader;
pub use pool::{
    FanOutPool, ItemMessage, ItemProcessor, ItemRecord, Subtask, SubtaskContext, SubtaskMessage,
    SubtaskReport, WorkerPool,
};
pub use store::{
    FsObjectStore, InMemoryObjectStore, ObjectStore, PartialResultStore, StorageKeys, StoreError,
};

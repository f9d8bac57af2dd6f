//! `stepwise-core`: building blocks of the episode engine.
//!
//! This crate contains **pure** types (no storage, no threads): identifiers,
//! the error taxonomy, episode state, work manifests and deadlines.

pub mod deadline;
pub mod episode;
pub mod error;
pub mod id;
pub mod manifest;

pub use deadline::{
    Clock, Deadline, DeadlineClock, HostBudget, ManualClock, PredictivePoll, RemainingTime,
    SystemClock, DEFAULT_PREDICTIVE_MULTIPLIER, DEFAULT_SAFETY_BUFFER,
};
pub use episode::{
    progress_percent, EpisodeMetrics, EpisodeState, EpisodeStatus, JobParams, SubtaskProgress,
    SubtaskStatus,
};
pub use error::{EngineError, EngineResult, ItemError};
pub use id::{InvocationId, JobId, SubtaskId};
pub use manifest::{join_key, FrameCapture, ManifestSpec, WorkItem, WorkItemId, WorkManifest};

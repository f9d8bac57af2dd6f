//! Episode coordinators: one invocation in, the next episode state out.
//!
//! The orchestrator replays the returned state until it is terminal. A
//! coordinator never retries: every unrecoverable failure ends the episode in
//! `Error` and is propagated as an [`EpisodeFault`].

pub mod fanout;
pub mod homogeneous;

use stepwise_core::{EngineError, EpisodeState, ManifestSpec};
use thiserror::Error;

pub use fanout::FanOutCoordinator;
pub use homogeneous::EpisodeCoordinator;

/// An invocation that ended the episode with an error.
///
/// `state` is the terminal `Error` state to hand back to the orchestrator.
#[derive(Debug, Clone, Error)]
#[error("episode failed: {error}")]
pub struct EpisodeFault {
    pub state: EpisodeState,
    #[source]
    pub error: EngineError,
}

pub type InvocationResult = Result<EpisodeState, EpisodeFault>;

/// How expensive one unit of work is expected to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostModel {
    /// Roughly constant per item: checked against the deadline before each
    /// item, may fan out to workers.
    Fixed,
    /// Varies widely per item (page rendering): serial, predictive polling.
    Variable,
}

impl CostModel {
    pub fn for_manifest(spec: &ManifestSpec) -> Self {
        match spec {
            ManifestSpec::Pages { .. } => CostModel::Variable,
            _ => CostModel::Fixed,
        }
    }
}

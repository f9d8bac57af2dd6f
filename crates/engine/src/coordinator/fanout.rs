use std::sync::Arc;

use stepwise_core::{
    Clock, DeadlineClock, EngineError, EpisodeState, InvocationId, ManifestSpec, RemainingTime,
    SubtaskId, SystemClock,
};
use tracing::{debug, error, info, warn};

use super::{EpisodeFault, InvocationResult};
use crate::config::EngineConfig;
use crate::lease::{Lease, NoLease};
use crate::pool::{FanOutPool, Subtask};

/// Drives a fan-out episode: a fixed set of named subtasks, each started on
/// its own worker every invocation.
///
/// Progress is the share of completed subtasks. The cursor is not used.
pub struct FanOutCoordinator {
    subtasks: Vec<Box<dyn Subtask>>,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    lease: Box<dyn Lease>,
}

impl Default for FanOutCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl FanOutCoordinator {
    pub fn new() -> Self {
        Self {
            subtasks: Vec::new(),
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            lease: Box::new(NoLease),
        }
    }

    pub fn with_subtask(mut self, subtask: impl Subtask + 'static) -> Self {
        self.subtasks.push(Box::new(subtask));
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_lease(mut self, lease: impl Lease + 'static) -> Self {
        self.lease = Box::new(lease);
        self
    }

    pub fn invoke(&self, state: EpisodeState, host: &dyn RemainingTime) -> InvocationResult {
        if state.is_terminal() {
            debug!(job_id = %state.params.job_id, status = ?state.status, "episode already terminal");
            return Ok(state);
        }

        let invocation = InvocationId::new();
        let mut state = state;
        state.begin_invocation();
        info!(
            job_id = %state.params.job_id,
            invocation = %invocation,
            subtasks = state.subtasks.len(),
            "fan-out invocation started"
        );

        match self.run(&mut state, host) {
            Ok(()) => {
                info!(
                    job_id = %state.params.job_id,
                    invocation = %invocation,
                    status = ?state.status,
                    progress = state.progress,
                    "fan-out invocation finished"
                );
                Ok(state)
            }
            Err(error) => {
                error!(
                    job_id = %state.params.job_id,
                    invocation = %invocation,
                    error = %error,
                    "fan-out invocation failed"
                );
                state.mark_failed(&error);
                Err(EpisodeFault { state, error })
            }
        }
    }

    fn run(&self, state: &mut EpisodeState, host: &dyn RemainingTime) -> Result<(), EngineError> {
        state.params.validate()?;

        let ids = match &state.params.manifest {
            ManifestSpec::Subtasks { ids } => ids.clone(),
            other => {
                return Err(EngineError::manifest(format!(
                    "fan-out jobs need a subtask manifest, got {other:?}"
                )));
            }
        };
        let selected = self.resolve(&ids)?;
        state.bind_total(selected.len())?;

        let deadline = DeadlineClock::new(self.clock.clone(), self.config.safety_buffer).start(host);
        let pool = FanOutPool::new().with_name(state.params.kind.as_str());
        let progress = pool.run(&selected, &state.subtasks, &deadline)?;

        let done = progress
            .iter()
            .filter(|p| p.status == stepwise_core::SubtaskStatus::Completed)
            .count();
        state.subtasks = progress;
        state.metrics.last_processed = done;

        if done >= state.total {
            state.mark_completed();
            info!(job_id = %state.params.job_id, subtasks = state.total, "all subtasks completed");
        } else {
            state.mark_in_progress(done, state.total);
            match self.lease.extend(self.config.lease_ttl) {
                Ok(()) => debug!(job_id = %state.params.job_id, "lease extended"),
                Err(e) => warn!(job_id = %state.params.job_id, error = %e, "lease extension failed"),
            }
        }
        Ok(())
    }

    fn resolve(&self, ids: &[SubtaskId]) -> Result<Vec<&dyn Subtask>, EngineError> {
        ids.iter()
            .map(|id| {
                self.subtasks
                    .iter()
                    .find(|s| &s.id() == id)
                    .map(|s| s.as_ref())
                    .ok_or_else(|| EngineError::manifest(format!("no subtask registered for {id}")))
            })
            .collect()
    }
}

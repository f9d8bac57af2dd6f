use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use stepwise_core::{
    Clock, Deadline, DeadlineClock, EngineError, EpisodeState, InvocationId, PredictivePoll,
    RemainingTime, SystemClock, WorkManifest,
};
use tracing::{debug, error, info, warn};

use super::{CostModel, EpisodeFault, InvocationResult};
use crate::config::EngineConfig;
use crate::lease::{Lease, NoLease};
use crate::manifest_loader::ManifestLoader;
use crate::pool::{
    run_in_process, stride, ItemMessage, ItemProcessor, ItemRecord, SliceOutcome, WorkerPool,
};
use crate::store::{ObjectStore, PartialResultStore, StorageKeys};

/// Drives a homogeneous episode one invocation at a time.
pub struct EpisodeCoordinator<S: ObjectStore + ?Sized, P: ItemProcessor> {
    store: Arc<S>,
    processor: P,
    clock: Arc<dyn Clock>,
    config: EngineConfig,
    lease: Box<dyn Lease>,
    cost_model: Option<CostModel>,
}

impl<S: ObjectStore + ?Sized, P: ItemProcessor> EpisodeCoordinator<S, P> {
    pub fn new(store: Arc<S>, processor: P) -> Self {
        Self {
            store,
            processor,
            clock: Arc::new(SystemClock),
            config: EngineConfig::default(),
            lease: Box::new(NoLease),
            cost_model: None,
        }
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

    /// Override the cost model derived from the manifest source.
    pub fn with_cost_model(mut self, cost_model: CostModel) -> Self {
        self.cost_model = Some(cost_model);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run one invocation against `state`.
    ///
    /// Terminal states are returned unchanged.
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
            kind = %state.params.kind,
            cursor = state.cursor,
            "invocation started"
        );

        match self.run(&mut state, host) {
            Ok(()) => {
                info!(
                    job_id = %state.params.job_id,
                    invocation = %invocation,
                    status = ?state.status,
                    cursor = state.cursor,
                    progress = state.progress,
                    processed = state.metrics.last_processed,
                    "invocation finished"
                );
                Ok(state)
            }
            Err(error) => {
                error!(
                    job_id = %state.params.job_id,
                    invocation = %invocation,
                    cursor = state.cursor,
                    error = %error,
                    "invocation failed"
                );
                state.mark_failed(&error);
                Err(EpisodeFault { state, error })
            }
        }
    }

    fn run(&self, state: &mut EpisodeState, host: &dyn RemainingTime) -> Result<(), EngineError> {
        state.params.validate()?;

        let keys = StorageKeys::for_job(&state.params);
        let mut manifest = ManifestLoader::new(&*self.store)
            .rebuild_unreadable(!state.has_bound_total())
            .load_or_build(&keys.manifest(), &state.params.manifest)?;
        state.bind_total(manifest.len())?;
        let results_key = keys.results();
        state.output_ref = Some(results_key.clone());

        let deadline = DeadlineClock::new(self.clock.clone(), self.config.safety_buffer).start(host);
        debug!(job_id = %state.params.job_id, ?deadline, total = state.total, "deadline computed");

        let results = PartialResultStore::with_field(self.store.clone(), self.config.result_field.as_str());
        let mut buffer: Vec<ItemRecord> = Vec::new();

        let cost = self
            .cost_model
            .unwrap_or_else(|| CostModel::for_manifest(&state.params.manifest));
        let pool = WorkerPool::new(self.config.hardware_parallelism).with_name(state.params.kind.as_str());
        let mut last_elapsed: Option<Duration> = None;

        while state.cursor < state.total && !deadline.is_expired() {
            let start = state.cursor;
            let (size, outcome) = self.dispatch(state, &manifest, &deadline, cost, &pool, last_elapsed)?;
            last_elapsed = outcome.last_elapsed.or(last_elapsed);
            let completed = absorb(&mut manifest, start, outcome.messages, &mut buffer)?;
            state.advance(completed);

            if buffer.len() >= self.config.flush_threshold {
                flush(&results, &results_key, &mut buffer, state)?;
            }
            if completed < size {
                debug!(job_id = %state.params.job_id, cursor = state.cursor, "slice cut short");
                break;
            }
        }

        flush(&results, &results_key, &mut buffer, state)?;

        if state.cursor >= state.total {
            state.mark_completed();
            info!(job_id = %state.params.job_id, total = state.total, "episode completed");
        } else {
            state.mark_in_progress(state.cursor, state.total);
            self.extend_lease(state);
        }
        Ok(())
    }

    /// Pick the next slice and run it. Returns the slice size and what the
    /// slice reported. `last_elapsed` is the last serial unit of this
    /// invocation, used by the predictive poll.
    fn dispatch(
        &self,
        state: &EpisodeState,
        manifest: &WorkManifest,
        deadline: &Deadline,
        cost: CostModel,
        pool: &WorkerPool,
        last_elapsed: Option<Duration>,
    ) -> Result<(usize, SliceOutcome), EngineError> {
        let pending = state.pending();
        let start = state.cursor;
        let flush_cap = self.config.flush_threshold;

        let (size, outcome) = match cost {
            CostModel::Variable => {
                let size = pending.min(flush_cap);
                let poll = PredictivePoll::new(self.config.predictive_multiplier);
                let slice = manifest.slice(start..start + size);
                (size, run_in_process(slice, deadline, Some(poll), last_elapsed, &self.processor)?)
            }
            CostModel::Fixed if pending <= self.config.in_process_threshold => {
                let size = pending.min(flush_cap);
                let slice = manifest.slice(start..start + size);
                (size, run_in_process(slice, deadline, None, None, &self.processor)?)
            }
            CostModel::Fixed => {
                let quota = state.params.concurrency_quota;
                let size = stride::slice_size(pending, quota).min(flush_cap);
                let slice = manifest.slice(start..start + size);
                (size, pool.run_strided(slice, quota, deadline, &self.processor)?)
            }
        };

        debug!(
            job_id = %state.params.job_id,
            cursor = start,
            size,
            workers = outcome.workers,
            reported = outcome.messages.len(),
            "slice dispatched"
        );
        Ok((size, outcome))
    }

    fn extend_lease(&self, state: &EpisodeState) {
        match self.lease.extend(self.config.lease_ttl) {
            Ok(()) => debug!(
                job_id = %state.params.job_id,
                ttl_secs = self.config.lease_ttl.as_secs(),
                "lease extended"
            ),
            Err(e) => warn!(job_id = %state.params.job_id, error = %e, "lease extension failed"),
        }
    }
}

/// Keep the contiguous completed prefix of a slice starting at `start`.
///
/// Results past the first gap are dropped; they are redone by a later
/// invocation.
fn absorb(
    manifest: &mut WorkManifest,
    start: usize,
    messages: Vec<ItemMessage>,
    buffer: &mut Vec<ItemRecord>,
) -> Result<usize, EngineError> {
    let mut by_index: BTreeMap<usize, ItemMessage> =
        messages.into_iter().map(|m| (m.index(), m)).collect();
    let done: BTreeSet<usize> = by_index.keys().copied().collect();
    let prefix = stride::contiguous_prefix(start, &done);

    for index in start..start + prefix {
        let (item, message) = match (manifest.get(index), by_index.remove(&index)) {
            (Some(item), Some(message)) => (item, message),
            _ => {
                return Err(EngineError::invalid_state(format!(
                    "reported index {index} is not in the manifest"
                )));
            }
        };
        let record = ItemRecord::from_message(item, message);
        manifest.record_result(index, record.manifest_value());
        buffer.push(record);
    }

    if !by_index.is_empty() {
        debug!(start, prefix, discarded = by_index.len(), "results past the first gap discarded");
    }
    Ok(prefix)
}

fn flush<S: ObjectStore>(
    results: &PartialResultStore<S>,
    key: &str,
    buffer: &mut Vec<ItemRecord>,
    state: &mut EpisodeState,
) -> Result<(), EngineError> {
    if buffer.is_empty() {
        return Ok(());
    }
    let merged = results.checkpoint(key, buffer.as_slice())?;
    state.mark_checkpoint();
    info!(
        job_id = %state.params.job_id,
        key,
        appended = buffer.len(),
        merged,
        cursor = state.cursor,
        "checkpoint written"
    );
    buffer.clear();
    Ok(())
}

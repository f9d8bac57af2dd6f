//! Homogeneous execution: the same operation over many items.
//!
//! Items run either on a pool of named scoped threads, each walking one
//! interleaved stride of the slice, or serially on the coordinator thread.
//! Workers only talk back through an mpsc channel; the coordinator owns every
//! durable write.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use stepwise_core::{Deadline, EngineError, ItemError, PredictivePoll, WorkItem};
use tracing::{debug, error, info};

use super::messages::ItemMessage;
use super::stride;

/// The per-item operation. Item failures are data, not faults.
pub trait ItemProcessor: Send + Sync {
    fn process(&self, item: &WorkItem) -> Result<JsonValue, ItemError>;
}

impl<F> ItemProcessor for F
where
    F: Fn(&WorkItem) -> Result<JsonValue, ItemError> + Send + Sync,
{
    fn process(&self, item: &WorkItem) -> Result<JsonValue, ItemError> {
        self(item)
    }
}

/// Messages produced by one dispatch round.
#[derive(Debug, Default)]
pub struct SliceOutcome {
    pub messages: Vec<ItemMessage>,
    pub workers: usize,
    /// Duration of the last unit run serially, if any.
    pub last_elapsed: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct WorkerPool {
    name: String,
    hardware_parallelism: usize,
}

impl WorkerPool {
    pub fn new(hardware_parallelism: usize) -> Self {
        Self {
            name: "stepwise-worker".to_string(),
            hardware_parallelism: hardware_parallelism.max(1),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn hardware_parallelism(&self) -> usize {
        self.hardware_parallelism
    }

    /// Run `slice` across worker threads, one stride per worker.
    ///
    /// Each worker polls `deadline` before every item. Resolves once every
    /// worker has exited; a worker that panics or cannot be started fails the
    /// whole round with a pool fault.
    pub fn run_strided<P>(
        &self,
        slice: &[WorkItem],
        quota: Option<usize>,
        deadline: &Deadline,
        processor: &P,
    ) -> Result<SliceOutcome, EngineError>
    where
        P: ItemProcessor + ?Sized,
    {
        let workers = stride::worker_count(slice.len(), quota, self.hardware_parallelism);
        if workers == 0 {
            return Ok(SliceOutcome::default());
        }

        info!(
            pool = %self.name,
            items = slice.len(),
            workers,
            first_index = slice[0].index,
            "dispatching slice to workers"
        );

        let messages = thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<ItemMessage>();
            let mut handles = Vec::with_capacity(workers);
            let mut fault = None;

            for worker in 0..workers {
                let name = format!("{}-{worker}", self.name);
                let tx = tx.clone();
                let deadline = deadline.clone();
                let spawned = thread::Builder::new().name(name.clone()).spawn_scoped(scope, move || {
                    run_stride(worker, workers, slice, &deadline, processor, tx)
                });
                match spawned {
                    Ok(handle) => handles.push((name, handle)),
                    Err(e) => {
                        error!(worker = %name, error = %e, "failed to start worker");
                        fault = Some(EngineError::pool_fault(name, format!("spawn failed: {e}")));
                        break;
                    }
                }
            }
            drop(tx);

            let messages: Vec<ItemMessage> = rx.iter().collect();

            for (name, handle) in handles {
                if let Err(payload) = handle.join() {
                    let reason = panic_reason(payload.as_ref());
                    error!(worker = %name, reason = %reason, "worker exited abnormally");
                    fault.get_or_insert(EngineError::pool_fault(name, reason));
                }
            }

            match fault {
                Some(err) => Err(err),
                None => Ok(messages),
            }
        })?;

        debug!(pool = %self.name, reported = messages.len(), "slice resolved");
        Ok(SliceOutcome {
            messages,
            workers,
            last_elapsed: None,
        })
    }
}

fn run_stride<P>(
    worker: usize,
    workers: usize,
    slice: &[WorkItem],
    deadline: &Deadline,
    processor: &P,
    tx: mpsc::Sender<ItemMessage>,
) where
    P: ItemProcessor + ?Sized,
{
    debug!(worker, workers, "worker started");
    let mut processed = 0usize;

    for pos in stride::stride(slice.len(), worker, workers) {
        if deadline.is_expired() {
            debug!(worker, processed, "deadline reached; worker stopping early");
            break;
        }
        let item = &slice[pos];
        if tx.send(process_one(processor, item)).is_err() {
            break;
        }
        processed += 1;
    }

    debug!(worker, processed, "worker exited");
}

fn process_one<P: ItemProcessor + ?Sized>(processor: &P, item: &WorkItem) -> ItemMessage {
    match processor.process(item) {
        Ok(result) => ItemMessage::Completed {
            index: item.index,
            result,
        },
        Err(error) => {
            debug!(index = item.index, error = %error, "item failed");
            ItemMessage::Failed {
                index: item.index,
                error,
            }
        }
    }
}

/// Serial processing on the coordinator thread.
///
/// With a fixed-cost poll the deadline is checked before each item. With a
/// predictive poll every item must also fit the projected cost of the
/// previous one; `carried` is the last unit of an earlier slice, so only the
/// very first unit of an invocation runs on the deadline alone.
pub fn run_in_process<P>(
    slice: &[WorkItem],
    deadline: &Deadline,
    predictive: Option<PredictivePoll>,
    carried: Option<Duration>,
    processor: &P,
) -> Result<SliceOutcome, EngineError>
where
    P: ItemProcessor + ?Sized,
{
    let mut messages = Vec::with_capacity(slice.len());
    let mut last_elapsed = carried;

    for item in slice {
        let permitted = match (predictive, last_elapsed) {
            (Some(poll), Some(elapsed)) => poll.permits_next(deadline, elapsed),
            _ => !deadline.is_expired(),
        };
        if !permitted {
            debug!(
                index = item.index,
                remaining_ms = deadline.remaining().as_millis() as u64,
                "stopping before next unit"
            );
            break;
        }

        let started = deadline.now();
        let message = panic::catch_unwind(AssertUnwindSafe(|| process_one(processor, item)))
            .map_err(|payload| {
                let reason = panic_reason(payload.as_ref());
                error!(index = item.index, reason = %reason, "in-process unit panicked");
                EngineError::pool_fault("in-process", reason)
            })?;
        last_elapsed = Some(deadline.now().saturating_duration_since(started));
        messages.push(message);
    }

    Ok(SliceOutcome {
        messages,
        workers: 0,
        last_elapsed,
    })
}

pub(crate) fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::time::Duration;

    use serde_json::json;
    use stepwise_core::{DeadlineClock, ManualClock, WorkManifest, DEFAULT_SAFETY_BUFFER};

    use super::*;

    fn deadline(clock: &Arc<ManualClock>, usable: Duration) -> Deadline {
        DeadlineClock::new(clock.clone(), DEFAULT_SAFETY_BUFFER).start(&(usable + DEFAULT_SAFETY_BUFFER))
    }

    #[test]
    fn every_item_reported_once() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::from_secs(60));
        let manifest = WorkManifest::counted(1000);
        let processor = |item: &WorkItem| -> Result<JsonValue, ItemError> { Ok(json!(item.index * 2)) };

        let outcome = WorkerPool::new(8)
            .run_strided(manifest.items(), None, &deadline, &processor)
            .unwrap();

        assert_eq!(outcome.workers, 8);
        let indices: BTreeSet<usize> = outcome.messages.iter().map(ItemMessage::index).collect();
        assert_eq!(indices.len(), 1000);
        assert_eq!(indices.iter().next_back(), Some(&999));
    }

    #[test]
    fn worker_threads_are_named() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::from_secs(60));
        let manifest = WorkManifest::counted(4);
        let processor = |_: &WorkItem| -> Result<JsonValue, ItemError> {
            let name = thread::current().name().unwrap_or_default().to_string();
            Ok(json!(name))
        };

        let outcome = WorkerPool::new(2)
            .with_name("hash")
            .run_strided(manifest.items(), None, &deadline, &processor)
            .unwrap();

        for message in outcome.messages {
            match message {
                ItemMessage::Completed { result, .. } => {
                    assert!(result.as_str().unwrap().starts_with("hash-"))
                }
                other => panic!("unexpected {other:?}"),
            }
        }
    }

    #[test]
    fn item_failures_do_not_stop_the_stride() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::from_secs(60));
        let manifest = WorkManifest::counted(6);
        let processor = |item: &WorkItem| -> Result<JsonValue, ItemError> {
            if item.index % 2 == 0 {
                Err(ItemError::new("rejected"))
            } else {
                Ok(json!(null))
            }
        };

        let outcome = WorkerPool::new(1)
            .run_strided(manifest.items(), None, &deadline, &processor)
            .unwrap();
        assert_eq!(outcome.messages.len(), 6);
        assert_eq!(outcome.messages.iter().filter(|m| m.is_failure()).count(), 3);
    }

    #[test]
    fn panicking_worker_faults_the_pool() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::from_secs(60));
        let manifest = WorkManifest::counted(8);
        let processor = |item: &WorkItem| -> Result<JsonValue, ItemError> {
            if item.index == 5 {
                panic!("decoder crashed");
            }
            Ok(json!(item.index))
        };

        let err = WorkerPool::new(4)
            .run_strided(manifest.items(), None, &deadline, &processor)
            .unwrap_err();
        match err {
            EngineError::PoolFault { worker, reason } => {
                assert_eq!(worker, "stepwise-worker-1");
                assert_eq!(reason, "decoder crashed");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn expired_deadline_starts_no_item() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::ZERO);
        let manifest = WorkManifest::counted(200);
        let processor = |_: &WorkItem| -> Result<JsonValue, ItemError> { panic!("must not run") };

        let outcome = WorkerPool::new(4)
            .run_strided(manifest.items(), None, &deadline, &processor)
            .unwrap();
        assert!(outcome.messages.is_empty());

        let serial = run_in_process(manifest.items(), &deadline, None, None, &processor).unwrap();
        assert!(serial.messages.is_empty());
    }

    #[test]
    fn predictive_poll_stops_before_an_expensive_unit() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::from_secs(50));
        let manifest = WorkManifest::pages(10);
        let costs = clock.clone();
        // Page 3 costs 40s; after it only 6s remain.
        let processor = move |item: &WorkItem| -> Result<JsonValue, ItemError> {
            let secs = if item.index == 2 { 40 } else { 2 };
            costs.advance(Duration::from_secs(secs));
            Ok(json!(item.index))
        };

        let outcome =
            run_in_process(manifest.items(), &deadline, Some(PredictivePoll::default()), None, &processor)
                .unwrap();
        assert_eq!(outcome.messages.len(), 3);
        assert_eq!(outcome.last_elapsed, Some(Duration::from_secs(40)));
    }

    #[test]
    fn carried_elapsed_gates_the_first_unit_of_a_slice() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::from_secs(30));
        let manifest = WorkManifest::pages(3);
        let processor = |_: &WorkItem| -> Result<JsonValue, ItemError> { panic!("must not run") };

        // 30s left, previous slice ended on a 40s unit.
        let outcome = run_in_process(
            manifest.items(),
            &deadline,
            Some(PredictivePoll::default()),
            Some(Duration::from_secs(40)),
            &processor,
        )
        .unwrap();
        assert!(outcome.messages.is_empty());
        assert_eq!(outcome.last_elapsed, Some(Duration::from_secs(40)));
    }

    #[test]
    fn in_process_panic_is_a_pool_fault() {
        let clock = ManualClock::arc();
        let deadline = deadline(&clock, Duration::from_secs(60));
        let manifest = WorkManifest::counted(3);
        let processor = |_: &WorkItem| -> Result<JsonValue, ItemError> { panic!("boom") };

        assert!(matches!(
            run_in_process(manifest.items(), &deadline, None, None, &processor),
            Err(EngineError::PoolFault { .. })
        ));
    }
}

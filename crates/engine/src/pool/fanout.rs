//! Heterogeneous execution: a few named, independent subtasks side by side.

use std::sync::mpsc;
use std::thread;

use stepwise_core::{Deadline, EngineError, SubtaskId, SubtaskProgress, SubtaskStatus};
use tracing::{debug, error, info};

use super::homogeneous::panic_reason;
use super::messages::{SubtaskMessage, SubtaskReport};

/// What a subtask sees when it starts.
#[derive(Debug, Clone)]
pub struct SubtaskContext {
    pub deadline: Deadline,
    /// Progress carried over from the previous invocation, if any.
    pub prior: Option<SubtaskProgress>,
}

/// One independent operation of a fan-out job.
///
/// Runs until it is done or the deadline passes and reports where it got to.
/// Returning an error fails the whole invocation.
pub trait Subtask: Send + Sync {
    fn id(&self) -> SubtaskId;

    fn run(&self, ctx: SubtaskContext) -> Result<SubtaskReport, EngineError>;
}

#[derive(Debug, Clone)]
pub struct FanOutPool {
    name: String,
}

impl Default for FanOutPool {
    fn default() -> Self {
        Self {
            name: "stepwise-subtask".to_string(),
        }
    }
}

impl FanOutPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Start one worker per subtask and wait for all of them.
    ///
    /// Returns progress in `subtasks` order. Any fault or panic fails the
    /// whole pool and no progress is returned.
    pub fn run(
        &self,
        subtasks: &[&dyn Subtask],
        prior: &[SubtaskProgress],
        deadline: &Deadline,
    ) -> Result<Vec<SubtaskProgress>, EngineError> {
        if subtasks.is_empty() {
            return Ok(Vec::new());
        }

        info!(pool = %self.name, subtasks = subtasks.len(), "starting subtask workers");

        let messages = thread::scope(|scope| {
            let (tx, rx) = mpsc::channel::<SubtaskMessage>();
            let mut handles = Vec::with_capacity(subtasks.len());
            let mut fault = None;

            for subtask in subtasks {
                let id = subtask.id();
                let name = format!("{}-{id}", self.name);
                let ctx = SubtaskContext {
                    deadline: deadline.clone(),
                    prior: prior.iter().find(|p| p.id == id).cloned(),
                };
                let tx = tx.clone();
                let worker_id = id.clone();
                let spawned = thread::Builder::new().name(name.clone()).spawn_scoped(scope, move || {
                    debug!(subtask = %worker_id, "subtask worker started");
                    let message = match subtask.run(ctx) {
                        Ok(report) => SubtaskMessage::report(worker_id.clone(), report),
                        Err(e) => SubtaskMessage::Fault {
                            subtask: worker_id.clone(),
                            reason: e.to_string(),
                        },
                    };
                    let _ = tx.send(message);
                    debug!(subtask = %worker_id, "subtask worker exited");
                });
                match spawned {
                    Ok(handle) => handles.push((name, handle)),
                    Err(e) => {
                        error!(subtask = %id, error = %e, "failed to start subtask worker");
                        fault = Some(EngineError::pool_fault(name, format!("spawn failed: {e}")));
                        break;
                    }
                }
            }
            drop(tx);

            let messages: Vec<SubtaskMessage> = rx.iter().collect();

            for (name, handle) in handles {
                if let Err(payload) = handle.join() {
                    let reason = panic_reason(payload.as_ref());
                    error!(worker = %name, reason = %reason, "subtask worker exited abnormally");
                    fault.get_or_insert(EngineError::pool_fault(name, reason));
                }
            }

            match fault {
                Some(err) => Err(err),
                None => Ok(messages),
            }
        })?;

        let mut progress = Vec::with_capacity(subtasks.len());
        for subtask in subtasks {
            let id = subtask.id();
            let message = messages
                .iter()
                .find(|m| m.subtask() == &id)
                .cloned()
                .ok_or_else(|| EngineError::subtask_fault(id.clone(), "subtask reported nothing"))?;
            match message {
                SubtaskMessage::Progress {
                    subtask,
                    status,
                    partial,
                } => progress.push(SubtaskProgress {
                    id: subtask,
                    status,
                    partial,
                }),
                SubtaskMessage::Fault { subtask, reason } => {
                    error!(subtask = %subtask, reason = %reason, "subtask faulted");
                    return Err(EngineError::subtask_fault(subtask, reason));
                }
            }
        }

        let done = progress
            .iter()
            .filter(|p| p.status == SubtaskStatus::Completed)
            .count();
        debug!(pool = %self.name, done, total = progress.len(), "subtasks resolved");
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use stepwise_core::{DeadlineClock, ManualClock, DEFAULT_SAFETY_BUFFER};

    use super::*;

    struct Fixed {
        id: &'static str,
        outcome: Result<SubtaskStatus, &'static str>,
    }

    impl Subtask for Fixed {
        fn id(&self) -> SubtaskId {
            SubtaskId::new(self.id)
        }

        fn run(&self, ctx: SubtaskContext) -> Result<SubtaskReport, EngineError> {
            let runs = ctx
                .prior
                .and_then(|p| p.partial["runs"].as_u64())
                .unwrap_or(0);
            match self.outcome {
                Ok(status) => Ok(SubtaskReport {
                    status,
                    partial: json!({ "runs": runs + 1 }),
                }),
                Err(reason) => Err(EngineError::validation(reason)),
            }
        }
    }

    fn deadline() -> Deadline {
        DeadlineClock::new(ManualClock::arc(), DEFAULT_SAFETY_BUFFER)
            .start(&Duration::from_secs(600))
    }

    fn fixed(id: &'static str, outcome: Result<SubtaskStatus, &'static str>) -> Fixed {
        Fixed { id, outcome }
    }

    #[test]
    fn reports_progress_in_subtask_order() {
        let celeb = fixed("celeb", Ok(SubtaskStatus::Completed));
        let face = fixed("face", Ok(SubtaskStatus::InProgress));
        let subtasks: Vec<&dyn Subtask> = vec![&celeb, &face];
        let prior = vec![SubtaskProgress {
            id: SubtaskId::new("face"),
            status: SubtaskStatus::InProgress,
            partial: json!({"runs": 2}),
        }];

        let progress = FanOutPool::new().run(&subtasks, &prior, &deadline()).unwrap();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].id.as_str(), "celeb");
        assert_eq!(progress[0].partial["runs"], 1);
        assert_eq!(progress[1].status, SubtaskStatus::InProgress);
        assert_eq!(progress[1].partial["runs"], 3);
    }

    #[test]
    fn one_fault_fails_the_pool() {
        let celeb = fixed("celeb", Ok(SubtaskStatus::Completed));
        let face = fixed("face", Err("quota exceeded"));
        let face_match = fixed("face_match", Ok(SubtaskStatus::Completed));
        let subtasks: Vec<&dyn Subtask> = vec![&celeb, &face, &face_match];
        match FanOutPool::new().run(&subtasks, &[], &deadline()) {
            Err(EngineError::SubtaskFault { subtask, reason }) => {
                assert_eq!(subtask.as_str(), "face");
                assert!(reason.contains("quota exceeded"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn panicking_subtask_fails_the_pool() {
        struct Crashing;
        impl Subtask for Crashing {
            fn id(&self) -> SubtaskId {
                SubtaskId::new("crash")
            }
            fn run(&self, _ctx: SubtaskContext) -> Result<SubtaskReport, EngineError> {
                panic!("segfault in decoder")
            }
        }

        let subtasks: Vec<&dyn Subtask> = vec![&Crashing];
        assert!(matches!(
            FanOutPool::new().run(&subtasks, &[], &deadline()),
            Err(EngineError::PoolFault { .. })
        ));
    }

    #[test]
    fn empty_set_resolves_immediately() {
        assert!(FanOutPool::new().run(&[], &[], &deadline()).unwrap().is_empty());
    }
}

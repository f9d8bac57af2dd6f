//! Episode state: the record the external orchestrator stores and replays
//! between invocations.
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted ──▶ InProgress ──▶ Completed
//!                  │   ▲  └────▶ Error
//!                  └───┘ (one loop per invocation)
//! ```
//!
//! `Completed` and `Error` are terminal. The cursor never moves backwards
//! within an episode; it is reset to 0 only on completion so the persisted
//! manifest can be reused.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::EngineError;
use crate::id::{JobId, SubtaskId};
use crate::manifest::ManifestSpec;

/// Episode status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EpisodeStatus {
    NotStarted,
    InProgress,
    Completed,
    Error,
}

impl EpisodeStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, EpisodeStatus::Completed | EpisodeStatus::Error)
    }
}

/// Immutable job parameters supplied with the initial document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobParams {
    pub job_id: JobId,
    /// Work kind (e.g. `custom_labels`, `frame_hash`); part of storage keys.
    pub kind: String,
    pub manifest: ManifestSpec,
    /// External concurrency quota (e.g. provisioned inference units).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub concurrency_quota: Option<usize>,
    pub output_prefix: String,
}

impl JobParams {
    pub fn new(kind: impl Into<String>, manifest: ManifestSpec, output_prefix: impl Into<String>) -> Self {
        Self {
            job_id: JobId::new(),
            kind: kind.into(),
            manifest,
            concurrency_quota: None,
            output_prefix: output_prefix.into(),
        }
    }

    pub fn with_job_id(mut self, job_id: JobId) -> Self {
        self.job_id = job_id;
        self
    }

    pub fn with_concurrency_quota(mut self, quota: usize) -> Self {
        self.concurrency_quota = Some(quota);
        self
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.kind.trim().is_empty() {
            return Err(EngineError::validation("job kind must not be empty"));
        }
        if self.kind.contains('/') {
            return Err(EngineError::validation("job kind must not contain '/'"));
        }
        if self.concurrency_quota == Some(0) {
            return Err(EngineError::validation("concurrency quota must be at least 1"));
        }
        Ok(())
    }
}

/// Status of one heterogeneous subtask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    InProgress,
    Completed,
}

/// Progress of one heterogeneous subtask, carried across invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtaskProgress {
    pub id: SubtaskId,
    pub status: SubtaskStatus,
    /// Subtask-defined partial output (its own cursor, output keys, ...).
    #[serde(default)]
    pub partial: JsonValue,
}

/// Invocation bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    pub started_at: Option<DateTime<Utc>>,
    pub invocation_started_at: Option<DateTime<Utc>>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    pub invocations: u32,
    /// Items (or subtasks) completed by the most recent invocation.
    pub last_processed: usize,
}

/// The unit passed between invocations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeState {
    pub params: JobParams,
    pub status: EpisodeStatus,
    /// Next unprocessed index.
    pub cursor: usize,
    /// Fixed manifest size (0 until the first invocation built the manifest).
    pub total: usize,
    /// Derived completion percentage.
    pub progress: u8,
    /// Key of the durable partial result object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_ref: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub subtasks: Vec<SubtaskProgress>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub metrics: EpisodeMetrics,
}

/// Completion percentage, rounded down so that only `done == total` yields 100.
pub fn progress_percent(done: usize, total: usize) -> u8 {
    if total == 0 || done >= total {
        return 100;
    }
    ((done as u128 * 100) / total as u128) as u8
}

impl EpisodeState {
    /// Initial document for a new episode.
    pub fn new(params: JobParams) -> Self {
        Self {
            params,
            status: EpisodeStatus::NotStarted,
            cursor: 0,
            total: 0,
            progress: 0,
            output_ref: None,
            subtasks: Vec::new(),
            error: None,
            metrics: EpisodeMetrics::default(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn pending(&self) -> usize {
        self.total.saturating_sub(self.cursor)
    }

    /// Record the start of an invocation.
    pub fn begin_invocation(&mut self) {
        let now = Utc::now();
        if self.status == EpisodeStatus::NotStarted {
            self.status = EpisodeStatus::InProgress;
            self.metrics.started_at = Some(now);
        }
        self.metrics.invocation_started_at = Some(now);
        self.metrics.invocations += 1;
        self.metrics.last_processed = 0;
    }

    /// Fix `total` on first use and check the cursor against it.
    /// `true` once an earlier invocation fixed `total` from a manifest.
    pub fn has_bound_total(&self) -> bool {
        self.total != 0 || self.cursor != 0
    }

    pub fn bind_total(&mut self, manifest_len: usize) -> Result<(), EngineError> {
        if !self.has_bound_total() {
            self.total = manifest_len;
        }
        if self.total != manifest_len {
            return Err(EngineError::invalid_state(format!(
                "episode expects {} items but manifest has {}",
                self.total, manifest_len
            )));
        }
        if self.cursor > self.total {
            return Err(EngineError::invalid_state(format!(
                "cursor {} beyond total {}",
                self.cursor, self.total
            )));
        }
        Ok(())
    }

    /// Move the cursor forward by `completed` items.
    pub fn advance(&mut self, completed: usize) {
        self.cursor = (self.cursor + completed).min(self.total);
        self.metrics.last_processed += completed;
    }

    pub fn mark_checkpoint(&mut self) {
        self.metrics.last_checkpoint_at = Some(Utc::now());
    }

    /// Terminal success. The cursor is reset for manifest reuse.
    pub fn mark_completed(&mut self) {
        self.status = EpisodeStatus::Completed;
        self.cursor = 0;
        self.progress = 100;
        self.error = None;
    }

    /// Budget ran out with work left: another invocation is needed.
    pub fn mark_in_progress(&mut self, done: usize, total: usize) {
        self.status = EpisodeStatus::InProgress;
        self.progress = progress_percent(done, total);
    }

    pub fn mark_failed(&mut self, error: &EngineError) {
        self.status = EpisodeStatus::Error;
        self.error = Some(error.to_string());
    }

    pub fn completed_subtasks(&self) -> usize {
        self.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Completed)
            .count()
    }
}

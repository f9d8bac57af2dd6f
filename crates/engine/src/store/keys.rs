//! Deterministic storage keys derived from job identity and work kind.

use stepwise_core::{join_key, JobParams};

const MANIFEST_FILENAME: &str = "manifest.json";
const RESULTS_FILENAME: &str = "results.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageKeys {
    base: String,
}

impl StorageKeys {
    /// `{output_prefix}/{job_id}/{kind}`
    pub fn for_job(params: &JobParams) -> Self {
        let job = join_key(&params.output_prefix, &params.job_id.to_string());
        Self {
            base: join_key(&job, &params.kind),
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn manifest(&self) -> String {
        join_key(&self.base, MANIFEST_FILENAME)
    }

    pub fn results(&self) -> String {
        join_key(&self.base, RESULTS_FILENAME)
    }
}

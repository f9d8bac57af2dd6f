//! Engine configuration.
//!
//! Environment variables (all optional):
//! - `STEPWISE_SAFETY_BUFFER_SECS`: reserve kept before the host's hard kill (default: 60)
//! - `STEPWISE_PREDICTIVE_MULTIPLIER`: next-unit cost multiplier for variable work (default: 1.2)
//! - `STEPWISE_IN_PROCESS_THRESHOLD`: pending count at or below which no workers start (default: 100)
//! - `STEPWISE_WORKER_COUNT`: hardware parallelism cap (default: num_cpus)
//! - `STEPWISE_LEASE_TTL_SECS`: TTL granted on each lease extension (default: 900)
//! - `STEPWISE_FLUSH_THRESHOLD`: buffered results that trigger a mid-invocation checkpoint (default: 1000)
//! - `STEPWISE_RESULT_FIELD`: collection field name in result objects (default: results)

use std::env;
use std::str::FromStr;
use std::time::Duration;

use stepwise_core::{DEFAULT_PREDICTIVE_MULTIPLIER, DEFAULT_SAFETY_BUFFER};
use thiserror::Error;

use crate::lease::DEFAULT_LEASE_TTL;
use crate::store::DEFAULT_COLLECTION_FIELD;

pub const DEFAULT_IN_PROCESS_THRESHOLD: usize = 100;
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?} ({reason})")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub safety_buffer: Duration,
    pub predictive_multiplier: f64,
    /// Pending items at or below this count are processed without workers.
    pub in_process_threshold: usize,
    /// Upper bound on concurrently running workers.
    pub hardware_parallelism: usize,
    pub lease_ttl: Duration,
    pub flush_threshold: usize,
    pub result_field: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            safety_buffer: DEFAULT_SAFETY_BUFFER,
            predictive_multiplier: DEFAULT_PREDICTIVE_MULTIPLIER,
            in_process_threshold: DEFAULT_IN_PROCESS_THRESHOLD,
            hardware_parallelism: num_cpus::get().max(1),
            lease_ttl: DEFAULT_LEASE_TTL,
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            result_field: DEFAULT_COLLECTION_FIELD.to_string(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(secs) = parse_var::<u64, _>(&lookup, "STEPWISE_SAFETY_BUFFER_SECS")? {
            config.safety_buffer = Duration::from_secs(secs);
        }
        if let Some(mult) = parse_var::<f64, _>(&lookup, "STEPWISE_PREDICTIVE_MULTIPLIER")? {
            if !mult.is_finite() || mult < 1.0 {
                return Err(invalid(
                    "STEPWISE_PREDICTIVE_MULTIPLIER",
                    mult.to_string(),
                    "must be a finite number >= 1.0",
                ));
            }
            config.predictive_multiplier = mult;
        }
        if let Some(threshold) = parse_var(&lookup, "STEPWISE_IN_PROCESS_THRESHOLD")? {
            config.in_process_threshold = threshold;
        }
        if let Some(workers) = parse_var::<usize, _>(&lookup, "STEPWISE_WORKER_COUNT")? {
            if workers == 0 {
                return Err(invalid("STEPWISE_WORKER_COUNT", "0".to_string(), "must be at least 1"));
            }
            config.hardware_parallelism = workers;
        }
        if let Some(secs) = parse_var::<u64, _>(&lookup, "STEPWISE_LEASE_TTL_SECS")? {
            config.lease_ttl = Duration::from_secs(secs);
        }
        if let Some(flush) = parse_var::<usize, _>(&lookup, "STEPWISE_FLUSH_THRESHOLD")? {
            if flush == 0 {
                return Err(invalid("STEPWISE_FLUSH_THRESHOLD", "0".to_string(), "must be at least 1"));
            }
            config.flush_threshold = flush;
        }
        if let Some(field) = lookup("STEPWISE_RESULT_FIELD") {
            if field.trim().is_empty() {
                return Err(invalid("STEPWISE_RESULT_FIELD", field, "must not be empty"));
            }
            config.result_field = field;
        }

        Ok(config)
    }

    pub fn with_safety_buffer(mut self, buffer: Duration) -> Self {
        self.safety_buffer = buffer;
        self
    }

    pub fn with_predictive_multiplier(mut self, multiplier: f64) -> Self {
        self.predictive_multiplier = multiplier;
        self
    }

    pub fn with_in_process_threshold(mut self, threshold: usize) -> Self {
        self.in_process_threshold = threshold;
        self
    }

    pub fn with_hardware_parallelism(mut self, workers: usize) -> Self {
        self.hardware_parallelism = workers.max(1);
        self
    }

    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self
    }

    pub fn with_flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold.max(1);
        self
    }

    pub fn with_result_field(mut self, field: impl Into<String>) -> Self {
        self.result_field = field.into();
        self
    }
}

fn parse_var<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| invalid(var, raw.clone(), e.to_string())),
    }
}

fn invalid(var: &'static str, value: String, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        value,
        reason: reason.into(),
    }
}

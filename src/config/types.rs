// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration type definitions.
//!
//! [`WeaveConfig`] is the partial form read from files and the environment;
//! [`WeaveSettings`] is the fully resolved form the client runs with.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default hosted trace server.
pub const DEFAULT_TRACE_SERVER_URL: &str = "https://trace.wandb.ai";

/// Default delay between an enqueue and the flush it schedules.
pub const DEFAULT_BATCH_INTERVAL_MS: u64 = 1000;

/// Default ceiling on the serialized size of one batch.
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 10 * 1024 * 1024;

/// Default number of consecutive failed flushes before the fatal policy applies.
pub const DEFAULT_MAX_BATCH_ERRORS: u32 = 10;

/// Default side log for items that cannot be batched.
pub const DEFAULT_ERROR_LOG: &str = "weaveErrorBatch.log";

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 60_000;

/// What happens once consecutive flush failures exceed the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FatalPolicy {
    /// Log and exit the process with status 1.
    #[default]
    Exit,
    /// Log and stop flushing. Queued items stay queued.
    Halt,
}

/// Configuration as written in a config file.
///
/// Can be defined in `.weave.json` or `.weave/config.json` in the project
/// root, or globally in `~/.weave/config.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeaveConfig {
    /// Project id in `entity/project` form
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,

    /// Trace server base URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_server_url: Option<String>,

    /// API key for the trace server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Per-request timeout in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_ms: Option<u64>,

    /// Batch transport settings
    #[serde(skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchConfigPartial>,
}

/// Batch transport settings as written in a config file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchConfigPartial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_limit_bytes: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_consecutive_errors: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fatal_policy: Option<FatalPolicy>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_log: Option<PathBuf>,
}

/// Resolved batch transport settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Debounce delay between the first enqueue and its flush.
    pub interval: Duration,
    /// Ceiling on the serialized size of one batch, in bytes.
    pub size_limit_bytes: usize,
    /// Consecutive flush failures tolerated before `fatal_policy` applies.
    pub max_consecutive_errors: u32,
    pub fatal_policy: FatalPolicy,
    /// Side log for items too large to batch. `None` disables it.
    pub error_log: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(DEFAULT_BATCH_INTERVAL_MS),
            size_limit_bytes: DEFAULT_BATCH_SIZE_LIMIT,
            max_consecutive_errors: DEFAULT_MAX_BATCH_ERRORS,
            fatal_policy: FatalPolicy::default(),
            error_log: Some(PathBuf::from(DEFAULT_ERROR_LOG)),
        }
    }
}

impl BatchConfig {
    /// Settings suited to tests: short interval, halting instead of exiting.
    pub fn testing() -> Self {
        Self {
            interval: Duration::from_millis(10),
            fatal_policy: FatalPolicy::Halt,
            error_log: None,
            ..Default::default()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_size_limit(mut self, bytes: usize) -> Self {
        self.size_limit_bytes = bytes;
        self
    }

    pub fn with_max_consecutive_errors(mut self, max: u32) -> Self {
        self.max_consecutive_errors = max;
        self
    }

    pub fn with_fatal_policy(mut self, policy: FatalPolicy) -> Self {
        self.fatal_policy = policy;
        self
    }

    pub fn with_error_log(mut self, path: Option<PathBuf>) -> Self {
        self.error_log = path;
        self
    }

    pub(crate) fn apply(&mut self, partial: &BatchConfigPartial) {
        if let Some(ms) = partial.interval_ms {
            self.interval = Duration::from_millis(ms);
        }
        if let Some(bytes) = partial.size_limit_bytes {
            self.size_limit_bytes = bytes;
        }
        if let Some(max) = partial.max_consecutive_errors {
            self.max_consecutive_errors = max;
        }
        if let Some(policy) = partial.fatal_policy {
            self.fatal_policy = policy;
        }
        if partial.error_log.is_some() {
            self.error_log = partial.error_log.clone();
        }
    }
}

/// Fully resolved client settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WeaveSettings {
    /// `entity/project`; required before a client can be built.
    pub project_id: Option<String>,
    pub trace_server_url: String,
    pub api_key: Option<String>,
    pub request_timeout_ms: u64,
    pub batch: BatchConfig,
}

impl Default for WeaveSettings {
    fn default() -> Self {
        Self {
            project_id: None,
            trace_server_url: DEFAULT_TRACE_SERVER_URL.to_string(),
            api_key: None,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT_MS,
            batch: BatchConfig::default(),
        }
    }
}

impl WeaveSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

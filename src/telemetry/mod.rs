// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Logging and transport metrics.
//!
//! - **Logging**: `tracing` events and one `op` span per traced call. Install
//!   a subscriber with [`init_telemetry`], or bring your own.
//! - **Metrics**: per-client [`TransportMetrics`] counting batches, items,
//!   failures and flush latency.
//!
//! # Usage
//!
//! ```rust,ignore
//! use weave::telemetry::{init_telemetry, TelemetryConfig};
//!
//! let _guard = init_telemetry(&TelemetryConfig::development())?;
//! ```
//!
//! Span fields recorded for each call: `op_name`, `call_id`, `trace_id`.

mod init;
pub mod metrics;

pub use init::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
pub use metrics::{Histogram, OpMetrics, TransportMetrics, TransportSnapshot};

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Weave - tracing client for LLM applications.
//!
//! Wrap functions as traced ops and every invocation is recorded as a call,
//! nested under whatever call was running when it started. Calls are queued
//! and delivered to a trace server in batches. Objects, datasets, and tables
//! referenced by calls (or published directly) are saved once and embedded
//! by reference.
//!
//! # Architecture
//!
//! - [`context`] - Call stack and execution-scoped context
//! - [`op`] - Traced op wrapper
//! - [`summary`] - Summary roll-up from child calls
//! - [`client`] - Client façade, reference-tracking saver, call queries
//! - [`batch`] - Batched delivery of call records
//! - [`server`] - Trace server interface, HTTP and in-memory implementations
//! - [`value`] - Value model and trackable entities
//! - [`refs`] - Reference URIs
//! - [`digest`] - Content digests and object-id sanitization
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Logging setup and transport metrics
//! - [`error`] - Error types
//!
//! # Example
//!
//! ```rust,ignore
//! use weave::{op, op_with, OpOptions};
//!
//! let client = weave::init("acme/chat")?;
//!
//! let retrieve = op(retrieve_docs);
//! let answer = op_with(answer_question, OpOptions::new().name("answer"));
//!
//! answer.call((question,)).await?;
//! client.wait_for_batch_processing().await;
//! ```

pub mod batch;
pub mod client;
pub mod config;
pub mod context;
pub mod digest;
pub mod error;
pub mod op;
pub mod refs;
pub mod server;
pub mod summary;
pub mod telemetry;
pub mod value;

// Re-export commonly used types at crate root
pub use client::{
    clear_global_client, current_client, init, init_with, require_client, set_global_client,
    CallsQuery, WeaveClient,
};
pub use config::{BatchConfig, FatalPolicy, InitOptions, WeaveSettings};
pub use context::{current_call, spawn_with_context, with_attributes};
pub use error::{ConfigError, Result, TraceServerError, WeaveError};
pub use op::{op, op_with, CallInputs, Op, OpOptions, ParameterNames, StreamReducer, TracedStream};
pub use refs::{ObjectRef, Reference, TableRef, TableRowRef};
pub use server::{
    CallSchema, CallState, CallsFilter, HttpTraceServer, InMemoryTraceServer, SharedTraceServer,
    TraceServer,
};
pub use summary::Summary;
pub use telemetry::{init_telemetry, LogFormat, TelemetryConfig, TelemetryGuard};
pub use value::{Dataset, Json, Media, Table, ToWeaveValue, WeaveObject, WeaveValue};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Wait for the global client to deliver everything queued so far.
///
/// Returns [`WeaveError::NotInitialized`] when no client is installed.
pub async fn wait_for_batch_processing() -> std::result::Result<(), WeaveError> {
    require_client()?.wait_for_batch_processing().await;
    Ok(())
}

/// Publish through the global client. See [`WeaveClient::publish`].
pub async fn publish(value: &impl ToWeaveValue) -> std::result::Result<Reference, WeaveError> {
    require_client()?.publish(value).await
}

/// Query calls through the global client. See [`WeaveClient::get_calls`].
pub async fn get_calls(
    query: impl Into<CallsQuery>,
) -> std::result::Result<Vec<CallSchema>, WeaveError> {
    require_client()?.get_calls(query).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let _filter = CallsFilter::default();
        let _options = OpOptions::new().name("exported");
        let _value = WeaveValue::from(serde_json::json!({"a": 1}));
    }
}

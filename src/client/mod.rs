// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! The tracing client.
//!
//! [`WeaveClient`] ties the pieces together: it creates and finishes call
//! records for traced ops, saves referenced values exactly once, queues call
//! records on the batch transport, and reads calls and objects back.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use weave::{op, InMemoryTraceServer, WeaveClient};
//!
//! let client = WeaveClient::new(Arc::new(InMemoryTraceServer::new()), "acme/chat");
//! weave::set_global_client(client.clone());
//!
//! let add = op(|(a, b): (i64, i64)| async move { Ok::<_, String>(a + b) });
//! assert_eq!(add.call((1, 2)).await, Ok(3));
//!
//! client.wait_for_batch_processing().await;
//! let calls = client.get_calls(weave::CallsFilter::default()).await?;
//! ```

mod calls;
mod global;
mod read;
mod save;

pub use calls::CallsQuery;
pub use global::{
    clear_global_client, current_client, init, init_with, require_client, set_global_client,
};

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::batch::{BatchProcessor, InFlight};
use crate::config::{validate_project_id, BatchConfig, WeaveSettings};
use crate::context::{CallStackEntry, PushedCall};
use crate::error::WeaveError;
use crate::server::{
    CallBatchItem, CallEndReq, CallStartReq, EndedCallSchemaForInsert, HttpTraceServer,
    SharedTraceServer, StartedCallSchemaForInsert,
};
use crate::summary::{merge_summaries, Summary};
use crate::telemetry::TransportMetrics;
use crate::value::{OpDef, WeaveValue};

/// Client for one project on one trace server.
///
/// Cheap to clone; clones share the queue, metrics and background tasks.
#[derive(Clone)]
pub struct WeaveClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    project_id: String,
    server: SharedTraceServer,
    batch: BatchProcessor,
    metrics: Arc<TransportMetrics>,
    /// Background saves and call-record tasks.
    tasks: InFlight,
}

/// How a call ended.
#[derive(Debug, Clone)]
pub(crate) enum CallOutcome {
    Output(WeaveValue),
    Exception(String),
}

/// A call whose start record is being prepared in the background.
pub(crate) struct StartedCall {
    call_id: String,
    op_name: String,
    project_id: String,
    started: Instant,
    start_task: JoinHandle<()>,
}

impl WeaveClient {
    /// Create a client with default batch settings.
    pub fn new(server: SharedTraceServer, project_id: impl Into<String>) -> Self {
        Self::with_batch_config(server, project_id, BatchConfig::default())
    }

    pub fn with_batch_config(
        server: SharedTraceServer,
        project_id: impl Into<String>,
        batch_config: BatchConfig,
    ) -> Self {
        let metrics = Arc::new(TransportMetrics::new());
        let batch = BatchProcessor::new(server.clone(), batch_config, metrics.clone());
        Self {
            inner: Arc::new(ClientInner {
                project_id: project_id.into(),
                server,
                batch,
                metrics,
                tasks: InFlight::new(),
            }),
        }
    }

    /// Build a client talking HTTP to the configured trace server.
    pub fn from_settings(settings: &WeaveSettings) -> Result<Self, WeaveError> {
        let project_id = settings
            .project_id
            .clone()
            .ok_or_else(|| crate::error::ConfigError::MissingField("project".to_string()))?;
        validate_project_id(&project_id)?;

        let server = HttpTraceServer::new(
            settings.trace_server_url.clone(),
            settings.api_key.clone(),
            Some(settings.request_timeout()),
        )?;
        Ok(Self::with_batch_config(
            Arc::new(server),
            project_id,
            settings.batch.clone(),
        ))
    }

    pub fn project_id(&self) -> &str {
        &self.inner.project_id
    }

    pub fn server(&self) -> &SharedTraceServer {
        &self.inner.server
    }

    pub fn transport_metrics(&self) -> &TransportMetrics {
        &self.inner.metrics
    }

    pub fn batch_processor(&self) -> &BatchProcessor {
        &self.inner.batch
    }

    /// Whether two handles refer to the same client.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Wait until every pending save and call record has been delivered.
    ///
    /// Loops because finishing background work can queue more records.
    pub async fn wait_for_batch_processing(&self) {
        loop {
            self.inner.tasks.wait_idle().await;
            self.inner.batch.drain().await;
            if self.inner.tasks.current() == 0 && self.inner.batch.pending_flushes() == 0 {
                return;
            }
        }
    }

    /// Run `future` in the background, counted by [`Self::wait_for_batch_processing`].
    pub(crate) fn spawn_tracked<F>(&self, future: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let guard = self.inner.tasks.begin();
        tokio::spawn(async move {
            let _guard = guard;
            future.await
        })
    }

    /// Begin a call: trigger saves of the inputs and op, then prepare and
    /// queue the start record without blocking the caller.
    pub(crate) fn create_call(
        &self,
        op: &OpDef,
        pushed: &PushedCall,
        inputs: Vec<(String, WeaveValue)>,
        display_name: Option<String>,
        attributes: Map<String, Value>,
    ) -> StartedCall {
        let started_at = Utc::now();
        let current = &pushed.current_call;

        for (_, value) in &inputs {
            self.trigger_saves(value);
        }
        let op_ref = self.save_op(op);

        let start = StartedCallSchemaForInsert {
            project_id: self.inner.project_id.clone(),
            id: current.call_id.clone(),
            op_name: op.name().to_string(),
            display_name,
            trace_id: current.trace_id.clone(),
            parent_id: pushed.parent_call.as_ref().map(|p| p.call_id.clone()),
            started_at,
            attributes,
            inputs: Map::new(),
        };

        let client = self.clone();
        let start_task = self.spawn_tracked(async move {
            let mut start = start;
            match op_ref.await {
                Ok(reference) => start.op_name = reference.uri(),
                Err(e) => warn!(op = %start.op_name, error = %e, "Failed to save op; using its name"),
            }
            for (name, value) in inputs {
                let json = client.serialize_or_plain(&value).await;
                start.inputs.insert(name, json);
            }
            debug!(call_id = %start.id, op = %start.op_name, "Call started");
            client
                .inner
                .batch
                .enqueue(CallBatchItem::Start(CallStartReq { start }));
        });

        StartedCall {
            call_id: current.call_id.clone(),
            op_name: op.name().to_string(),
            project_id: self.inner.project_id.clone(),
            started: Instant::now(),
            start_task,
        }
    }

    /// Finish a call.
    ///
    /// Summaries are merged synchronously: the call's own summary with its
    /// children's, and the result into the parent's accumulator. The end
    /// record is queued in the background once the start record is queued.
    pub(crate) fn finish_call(
        &self,
        started: StartedCall,
        current: &Arc<CallStackEntry>,
        parent: Option<&Arc<CallStackEntry>>,
        outcome: CallOutcome,
        own_summary: Summary,
    ) -> JoinHandle<()> {
        let ended_at = Utc::now();
        let summary = merge_summaries(&own_summary, &current.child_summary());
        if let Some(parent) = parent {
            parent.merge_child_summary(&summary);
        }

        let success = matches!(outcome, CallOutcome::Output(_));
        #[cfg(feature = "telemetry")]
        self.inner
            .metrics
            .record_call(&started.op_name, started.started.elapsed(), success);

        if let CallOutcome::Output(value) = &outcome {
            self.trigger_saves(value);
        }

        let client = self.clone();
        self.spawn_tracked(async move {
            let StartedCall {
                call_id,
                project_id,
                start_task,
                ..
            } = started;

            if let Err(e) = start_task.await {
                warn!(call_id = %call_id, error = %e, "Call start record failed; dropping end record");
                return;
            }

            let (output, exception) = match outcome {
                CallOutcome::Output(value) => (client.serialize_or_plain(&value).await, None),
                CallOutcome::Exception(message) => (Value::Null, Some(message)),
            };
            debug!(call_id = %call_id, success, "Call finished");
            client.inner.batch.enqueue(CallBatchItem::End(CallEndReq {
                end: EndedCallSchemaForInsert {
                    project_id,
                    id: call_id,
                    ended_at,
                    exception,
                    output,
                    summary,
                },
            }));
        })
    }
}

impl fmt::Debug for WeaveClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeaveClient")
            .field("project_id", &self.inner.project_id)
            .field("queued", &self.inner.batch.queue_len())
            .finish()
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Trace server API.
//!
//! The client talks to the server only through the [`TraceServer`] trait:
//!
//! - [`HttpTraceServer`] - the remote service over HTTP
//! - [`InMemoryTraceServer`] - a local store for tests and offline use

pub mod http;
pub mod memory;
pub mod ndjson;
pub mod types;

pub use http::HttpTraceServer;
pub use memory::{InMemoryTraceServer, RequestCounts};
pub use types::*;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::error::TraceServerError;

/// Stream of calls returned by a query.
pub type CallStream = BoxStream<'static, Result<CallSchema, TraceServerError>>;

/// Operations the client needs from a trace server.
#[async_trait]
pub trait TraceServer: Send + Sync {
    /// Deliver a batch of call start/end records, preserving their order.
    async fn call_upsert_batch(&self, req: CallCreateBatchReq) -> Result<(), TraceServerError>;

    /// Query calls, streamed as they are decoded.
    async fn calls_query_stream(&self, req: CallsQueryReq) -> Result<CallStream, TraceServerError>;

    async fn call_update(&self, req: CallUpdateReq) -> Result<(), TraceServerError>;

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, TraceServerError>;

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, TraceServerError>;

    /// Create a table. `row_digests` may be empty when the server does not
    /// report them; callers then fall back to [`TraceServer::table_query`].
    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, TraceServerError>;

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, TraceServerError>;

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, TraceServerError>;
}

/// Shared trace server handle.
pub type SharedTraceServer = Arc<dyn TraceServer>;

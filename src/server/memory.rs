// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory trace server.
//!
//! Stores calls, objects, tables and files in process. Digests are computed
//! the same way the client computes them. Delivered batches are recorded in
//! arrival order, and upserts can be made to fail on demand to exercise retry
//! paths.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use super::types::*;
use super::{CallStream, TraceServer};
use crate::digest::{bytes_digest, compute_digest};
use crate::error::TraceServerError;

/// Number of requests received per endpoint.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestCounts {
    pub call_upsert_batch: usize,
    pub calls_query: usize,
    pub call_update: usize,
    pub obj_create: usize,
    pub obj_read: usize,
    pub table_create: usize,
    pub table_query: usize,
    pub file_create: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    /// Calls in first-seen order.
    calls: Vec<CallSchema>,
    call_index: HashMap<String, usize>,
    /// Ends that arrived before their start.
    orphan_ends: HashMap<String, EndedCallSchemaForInsert>,
    objects: HashMap<(String, String, String), Value>,
    tables: HashMap<(String, String), Vec<TableRowSchema>>,
    files: HashMap<(String, String), Vec<u8>>,
    batches: Vec<Vec<CallBatchItem>>,
    counts: RequestCounts,
    fail_upserts: usize,
    always_fail_upserts: bool,
    report_row_digests: bool,
}

/// Trace server backed by process memory.
#[derive(Debug)]
pub struct InMemoryTraceServer {
    state: Mutex<MemoryState>,
}

impl Default for InMemoryTraceServer {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTraceServer {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                report_row_digests: true,
                ..Default::default()
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Make the next `n` batch upserts fail with a 503.
    pub fn fail_next_upserts(&self, n: usize) {
        self.lock().fail_upserts = n;
    }

    /// Make every batch upsert fail until turned off.
    pub fn set_upserts_failing(&self, failing: bool) {
        self.lock().always_fail_upserts = failing;
    }

    /// Whether `table_create` reports row digests. When off, clients must
    /// query the table to learn them.
    pub fn set_report_row_digests(&self, report: bool) {
        self.lock().report_row_digests = report;
    }

    /// Batches delivered successfully, in arrival order.
    pub fn batches(&self) -> Vec<Vec<CallBatchItem>> {
        self.lock().batches.clone()
    }

    /// Every delivered call record, flattened in arrival order.
    pub fn delivered_items(&self) -> Vec<CallBatchItem> {
        self.lock().batches.iter().flatten().cloned().collect()
    }

    /// All calls known to the server, in first-seen order.
    pub fn calls(&self) -> Vec<CallSchema> {
        self.lock().calls.clone()
    }

    pub fn call(&self, id: &str) -> Option<CallSchema> {
        let state = self.lock();
        state.call_index.get(id).map(|i| state.calls[*i].clone())
    }

    /// Stored value of an object version.
    pub fn object(&self, project_id: &str, object_id: &str, digest: &str) -> Option<Value> {
        self.lock()
            .objects
            .get(&(project_id.to_string(), object_id.to_string(), digest.to_string()))
            .cloned()
    }

    pub fn object_count(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn table_count(&self) -> usize {
        self.lock().tables.len()
    }

    pub fn file(&self, project_id: &str, digest: &str) -> Option<Vec<u8>> {
        self.lock()
            .files
            .get(&(project_id.to_string(), digest.to_string()))
            .cloned()
    }

    pub fn request_counts(&self) -> RequestCounts {
        self.lock().counts.clone()
    }

    fn apply_item(state: &mut MemoryState, item: &CallBatchItem) {
        match item {
            CallBatchItem::Start(req) => {
                let start = &req.start;
                if state.call_index.contains_key(&start.id) {
                    return;
                }
                let mut call = CallSchema::from_start(start);
                if let Some(end) = state.orphan_ends.remove(&start.id) {
                    call.apply_end(&end);
                }
                state.call_index.insert(start.id.clone(), state.calls.len());
                state.calls.push(call);
            }
            CallBatchItem::End(req) => {
                let end = &req.end;
                match state.call_index.get(&end.id) {
                    Some(i) => state.calls[*i].apply_end(end),
                    None => {
                        state.orphan_ends.insert(end.id.clone(), end.clone());
                    }
                }
            }
        }
    }
}

#[async_trait]
impl TraceServer for InMemoryTraceServer {
    async fn call_upsert_batch(&self, req: CallCreateBatchReq) -> Result<(), TraceServerError> {
        let mut state = self.lock();
        state.counts.call_upsert_batch += 1;

        if state.always_fail_upserts {
            return Err(TraceServerError::api(503, "upserts disabled"));
        }
        if state.fail_upserts > 0 {
            state.fail_upserts -= 1;
            return Err(TraceServerError::api(503, "injected failure"));
        }

        for item in &req.batch {
            Self::apply_item(&mut state, item);
        }
        state.batches.push(req.batch);
        Ok(())
    }

    async fn calls_query_stream(&self, req: CallsQueryReq) -> Result<CallStream, TraceServerError> {
        let mut state = self.lock();
        state.counts.calls_query += 1;

        let filter = req.filter.unwrap_or_default();
        let limit = req.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let calls: Vec<Result<CallSchema, TraceServerError>> = state
            .calls
            .iter()
            .filter(|c| c.project_id == req.project_id && filter.matches(c))
            .take(limit)
            .cloned()
            .map(Ok)
            .collect();
        Ok(stream::iter(calls).boxed())
    }

    async fn call_update(&self, req: CallUpdateReq) -> Result<(), TraceServerError> {
        let mut state = self.lock();
        state.counts.call_update += 1;

        let index = *state
            .call_index
            .get(&req.call_id)
            .ok_or_else(|| TraceServerError::NotFound(format!("call {}", req.call_id)))?;
        if let Some(name) = req.display_name {
            state.calls[index].display_name = Some(name);
        }
        Ok(())
    }

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, TraceServerError> {
        let mut state = self.lock();
        state.counts.obj_create += 1;

        let obj = req.obj;
        let digest = compute_digest(&obj.val);
        state
            .objects
            .insert((obj.project_id, obj.object_id, digest.clone()), obj.val);
        Ok(ObjCreateRes { digest })
    }

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, TraceServerError> {
        let mut state = self.lock();
        state.counts.obj_read += 1;

        let key = (req.project_id, req.object_id, req.digest);
        let val = state.objects.get(&key).cloned().ok_or_else(|| {
            TraceServerError::NotFound(format!("object {}:{}", key.1, key.2))
        })?;
        let (project_id, object_id, digest) = key;
        Ok(ObjReadRes {
            obj: ObjSchema {
                project_id,
                object_id,
                digest,
                val,
            },
        })
    }

    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, TraceServerError> {
        let mut state = self.lock();
        state.counts.table_create += 1;

        let table = req.table;
        let rows: Vec<TableRowSchema> = table
            .rows
            .into_iter()
            .map(|val| TableRowSchema {
                digest: compute_digest(&val),
                val,
            })
            .collect();
        let row_digests: Vec<String> = rows.iter().map(|r| r.digest.clone()).collect();
        let digest = compute_digest(&Value::from(row_digests.clone()));

        state.tables.insert((table.project_id, digest.clone()), rows);
        Ok(TableCreateRes {
            digest,
            row_digests: if state.report_row_digests {
                row_digests
            } else {
                Vec::new()
            },
        })
    }

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, TraceServerError> {
        let mut state = self.lock();
        state.counts.table_query += 1;

        let rows = state
            .tables
            .get(&(req.project_id, req.digest.clone()))
            .cloned()
            .ok_or_else(|| TraceServerError::NotFound(format!("table {}", req.digest)))?;
        Ok(TableQueryRes { rows })
    }

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, TraceServerError> {
        let mut state = self.lock();
        state.counts.file_create += 1;

        let digest = bytes_digest(&req.content);
        state
            .files
            .insert((req.project_id, digest.clone()), req.content);
        Ok(FileCreateRes { digest })
    }
}

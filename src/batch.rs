// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Batched delivery of call start/end records.
//!
//! Items are queued in memory and flushed by a single background task:
//!
//! ```text
//! idle --enqueue--> scheduled --interval--> flushing --ok, queue empty--> idle
//!                       ^                      |
//!                       +----failure/more------+
//! ```
//!
//! Only one flush task exists at a time. A failed batch goes back to the
//! front of the queue in its original order and is retried after the
//! interval. Past `max_consecutive_errors` failures in a row the configured
//! [`FatalPolicy`] applies.
//!
//! An item whose serialized size alone exceeds the batch ceiling can never be
//! sent; it is written to the side error log, counted as dropped, and removed.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use anyhow::Context;
use chrono::Utc;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, error, warn};

use crate::config::{BatchConfig, FatalPolicy};
use crate::error::Result;
use crate::server::{CallBatchItem, CallCreateBatchReq, SharedTraceServer};
use crate::telemetry::TransportMetrics;

/// Bytes of `{"batch":[]}` around the items.
const BATCH_ENVELOPE_BYTES: usize = 12;

/// Counts running background work and lets callers wait for it to reach zero.
#[derive(Debug)]
pub(crate) struct InFlight {
    count: Arc<watch::Sender<usize>>,
}

/// Decrements the owning [`InFlight`] when dropped.
#[derive(Debug)]
pub(crate) struct InFlightGuard {
    count: Arc<watch::Sender<usize>>,
}

impl InFlight {
    pub(crate) fn new() -> Self {
        let (count, _) = watch::channel(0);
        Self {
            count: Arc::new(count),
        }
    }

    pub(crate) fn begin(&self) -> InFlightGuard {
        self.count.send_modify(|n| *n += 1);
        InFlightGuard {
            count: self.count.clone(),
        }
    }

    pub(crate) fn current(&self) -> usize {
        *self.count.borrow()
    }

    /// Wait until no work is running.
    pub(crate) async fn wait_idle(&self) {
        let mut rx = self.count.subscribe();
        loop {
            if rx.wait_for(|n| *n == 0).await.is_err() {
                return;
            }
            // Work started between the wakeup and now is waited on too.
            if self.current() == 0 {
                return;
            }
        }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n = n.saturating_sub(1));
    }
}

#[derive(Debug, Default)]
struct BatchState {
    queue: VecDeque<CallBatchItem>,
    /// A flush task is waiting for its timer.
    scheduled: bool,
    /// A flush request is in flight.
    flushing: bool,
    consecutive_errors: u32,
    halted: bool,
}

struct BatchInner {
    server: SharedTraceServer,
    config: BatchConfig,
    metrics: Arc<TransportMetrics>,
    state: Mutex<BatchState>,
    flushes: InFlight,
}

/// Queue of call records flushed to the trace server in bounded batches.
#[derive(Clone)]
pub struct BatchProcessor {
    inner: Arc<BatchInner>,
}

/// One batch taken off the queue.
struct TakenBatch {
    items: Vec<CallBatchItem>,
    bytes: usize,
    oversized: Vec<(CallBatchItem, usize)>,
}

impl BatchProcessor {
    pub fn new(server: SharedTraceServer, config: BatchConfig, metrics: Arc<TransportMetrics>) -> Self {
        Self {
            inner: Arc::new(BatchInner {
                server,
                config,
                metrics,
                state: Mutex::new(BatchState::default()),
                flushes: InFlight::new(),
            }),
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Queue an item and make sure a flush is scheduled.
    ///
    /// Must be called from within a tokio runtime.
    pub fn enqueue(&self, item: CallBatchItem) {
        let mut state = self.inner.lock();
        debug!(call_id = item.call_id(), start = item.is_start(), "Enqueue call record");
        state.queue.push_back(item);
        self.inner.metrics.record_enqueued();

        if state.halted || state.scheduled || state.flushing {
            return;
        }
        state.scheduled = true;
        let guard = self.inner.flushes.begin();
        drop(state);

        let inner = self.inner.clone();
        tokio::spawn(async move {
            let _guard = guard;
            inner.run_flushes().await;
        });
    }

    /// Wait until no flush is scheduled or in flight.
    ///
    /// Returns with items still queued only if the processor halted.
    pub async fn drain(&self) {
        self.inner.flushes.wait_idle().await;
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// Number of flush tasks scheduled or running (zero or one).
    pub fn pending_flushes(&self) -> usize {
        self.inner.flushes.current()
    }

    /// Whether flushing stopped after too many consecutive failures.
    pub fn is_halted(&self) -> bool {
        self.inner.lock().halted
    }
}

impl BatchInner {
    fn lock(&self) -> MutexGuard<'_, BatchState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    async fn run_flushes(&self) {
        tokio::time::sleep(self.config.interval).await;

        loop {
            let taken = {
                let mut state = self.lock();
                state.scheduled = false;
                if state.halted {
                    return;
                }
                state.flushing = true;
                self.take_batch(&mut state)
            };

            for (item, size) in &taken.oversized {
                self.drop_oversized(item, *size);
            }

            if taken.items.is_empty() {
                let mut state = self.lock();
                state.flushing = false;
                if state.queue.is_empty() {
                    return;
                }
                state.scheduled = true;
                continue;
            }

            let count = taken.items.len();
            let started = Instant::now();
            let req = CallCreateBatchReq { batch: taken.items };
            // Kept so a failed batch can be requeued in its original order.
            let sent = req.batch.clone();

            match self.server.call_upsert_batch(req).await {
                Ok(()) => {
                    self.metrics
                        .record_batch_sent(count, taken.bytes, started.elapsed());
                    debug!(items = count, bytes = taken.bytes, "Flushed call batch");

                    let mut state = self.lock();
                    state.flushing = false;
                    state.consecutive_errors = 0;
                    if state.queue.is_empty() {
                        return;
                    }
                    state.scheduled = true;
                }
                Err(e) => {
                    self.metrics.record_flush_failed(started.elapsed());
                    error!(error = %e, items = count, "Failed to flush call batch; requeued");

                    if !self.requeue_failed(sent) {
                        return;
                    }
                    tokio::time::sleep(self.config.interval).await;
                }
            }
        }
    }

    /// Put a failed batch back at the front of the queue.
    ///
    /// Returns false when the failure tripped the error threshold.
    fn requeue_failed(&self, sent: Vec<CallBatchItem>) -> bool {
        let mut state = self.lock();
        state.flushing = false;
        for item in sent.into_iter().rev() {
            state.queue.push_front(item);
        }
        state.consecutive_errors += 1;

        let errors = state.consecutive_errors;
        if errors > self.config.max_consecutive_errors {
            state.halted = true;
            let queued = state.queue.len();
            drop(state);
            self.fatal(errors, queued);
            return false;
        }
        state.scheduled = true;
        true
    }

    /// Dequeue items while the batch stays under the size ceiling.
    fn take_batch(&self, state: &mut BatchState) -> TakenBatch {
        let limit = self.config.size_limit_bytes;
        let mut taken = TakenBatch {
            items: Vec::new(),
            bytes: BATCH_ENVELOPE_BYTES,
            oversized: Vec::new(),
        };

        while let Some(front) = state.queue.front() {
            let size = front.serialized_size();
            if BATCH_ENVELOPE_BYTES.saturating_add(size) > limit {
                if let Some(item) = state.queue.pop_front() {
                    taken.oversized.push((item, size));
                }
                continue;
            }
            // One comma per item after the first.
            let separator = usize::from(!taken.items.is_empty());
            if taken.bytes + separator + size > limit {
                break;
            }
            if let Some(item) = state.queue.pop_front() {
                taken.bytes += separator + size;
                taken.items.push(item);
            }
        }
        taken
    }

    fn drop_oversized(&self, item: &CallBatchItem, size: usize) {
        let limit = self.config.size_limit_bytes;
        error!(
            call_id = item.call_id(),
            size_bytes = size,
            limit_bytes = limit,
            "Call record exceeds batch size limit; dropped"
        );
        self.metrics.record_dropped();

        if let Some(path) = &self.config.error_log {
            if let Err(e) = append_error_log(path, item, size, limit) {
                warn!(error = %format!("{:#}", e), "Failed to write batch error log");
            }
        }
    }

    fn fatal(&self, errors: u32, queued: usize) {
        match self.config.fatal_policy {
            FatalPolicy::Exit => {
                error!(
                    consecutive_errors = errors,
                    queued, "Too many failed batch flushes; exiting"
                );
                std::process::exit(1);
            }
            FatalPolicy::Halt => {
                error!(
                    consecutive_errors = errors,
                    queued, "Too many failed batch flushes; call delivery halted"
                );
            }
        }
    }
}

/// Append one JSON line describing an unsendable item.
fn append_error_log(
    path: &Path,
    item: &CallBatchItem,
    size: usize,
    limit: usize,
) -> Result<()> {
    let mode = if item.is_start() { "start" } else { "end" };
    let entry = json!({
        "timestamp": Utc::now().to_rfc3339(),
        "reason": "item exceeds batch size limit",
        "call_id": item.call_id(),
        "mode": mode,
        "size_bytes": size,
        "limit_bytes": limit,
    });

    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating {}", dir.display()))?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("opening {}", path.display()))?;
    writeln!(file, "{}", entry).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

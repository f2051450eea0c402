// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Metrics collection for the call transport and traced ops.
//!
//! Lightweight in-process counters, kept per client. Nothing is exported;
//! read them through [`TransportMetrics::snapshot`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{Duration, Instant};

/// Counters for one client's batch transport and op calls.
#[derive(Debug)]
pub struct TransportMetrics {
    enqueued: AtomicU64,
    batches_sent: AtomicU64,
    items_sent: AtomicU64,
    bytes_sent: AtomicU64,
    failed_flushes: AtomicU64,
    dropped_items: AtomicU64,

    /// Latency of successful and failed flush requests.
    flush_latency: RwLock<Histogram>,

    /// Finished calls by op name.
    ops: RwLock<HashMap<String, OpMetrics>>,

    start_time: Instant,
}

impl TransportMetrics {
    pub fn new() -> Self {
        Self {
            enqueued: AtomicU64::new(0),
            batches_sent: AtomicU64::new(0),
            items_sent: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            failed_flushes: AtomicU64::new(0),
            dropped_items: AtomicU64::new(0),
            flush_latency: RwLock::new(Histogram::default()),
            ops: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub fn record_enqueued(&self) {
        self.enqueued.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a delivered batch.
    pub fn record_batch_sent(&self, items: usize, bytes: usize, latency: Duration) {
        self.batches_sent.fetch_add(1, Ordering::Relaxed);
        self.items_sent.fetch_add(items as u64, Ordering::Relaxed);
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
        self.record_latency(latency);
    }

    pub fn record_flush_failed(&self, latency: Duration) {
        self.failed_flushes.fetch_add(1, Ordering::Relaxed);
        self.record_latency(latency);
    }

    /// Record an item removed from the queue without being sent.
    pub fn record_dropped(&self) {
        self.dropped_items.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a finished call of `op_name`.
    pub fn record_call(&self, op_name: &str, duration: Duration, success: bool) {
        if let Ok(mut ops) = self.ops.write() {
            ops.entry(op_name.to_string())
                .or_insert_with(OpMetrics::new)
                .record(duration, success);
        }
    }

    fn record_latency(&self, latency: Duration) {
        if let Ok(mut histogram) = self.flush_latency.write() {
            histogram.record(latency);
        }
    }

    pub fn op_metrics(&self, op_name: &str) -> Option<OpMetrics> {
        self.ops.read().ok().and_then(|ops| ops.get(op_name).cloned())
    }

    /// Take a snapshot of all counters.
    pub fn snapshot(&self) -> TransportSnapshot {
        TransportSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            batches_sent: self.batches_sent.load(Ordering::Relaxed),
            items_sent: self.items_sent.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            failed_flushes: self.failed_flushes.load(Ordering::Relaxed),
            dropped_items: self.dropped_items.load(Ordering::Relaxed),
            flush_latency: self
                .flush_latency
                .read()
                .map(|h| h.clone())
                .unwrap_or_default(),
            ops: self.ops.read().map(|o| o.clone()).unwrap_or_default(),
            uptime: self.start_time.elapsed(),
        }
    }
}

impl Default for TransportMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Call counts and durations for one op.
#[derive(Debug, Clone)]
pub struct OpMetrics {
    pub calls: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_duration: Duration,
    pub max_duration: Duration,
}

impl OpMetrics {
    pub fn new() -> Self {
        Self {
            calls: 0,
            successes: 0,
            failures: 0,
            total_duration: Duration::ZERO,
            max_duration: Duration::ZERO,
        }
    }

    pub fn record(&mut self, duration: Duration, success: bool) {
        self.calls += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_duration += duration;
        self.max_duration = self.max_duration.max(duration);
    }

    pub fn avg_duration(&self) -> Duration {
        if self.calls == 0 {
            Duration::ZERO
        } else {
            self.total_duration / self.calls as u32
        }
    }
}

impl Default for OpMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple histogram with fixed buckets for latency tracking.
#[derive(Debug, Clone)]
pub struct Histogram {
    /// Bucket boundaries in microseconds.
    buckets: Vec<u64>,

    /// Count per bucket, plus one overflow bucket.
    counts: Vec<u64>,
}

impl Histogram {
    /// Create a histogram with custom bucket boundaries (in microseconds).
    pub fn with_buckets(buckets: Vec<u64>) -> Self {
        let counts = vec![0; buckets.len() + 1];
        Self { buckets, counts }
    }

    pub fn record(&mut self, duration: Duration) {
        let micros = duration.as_micros() as u64;
        let bucket_idx = self
            .buckets
            .iter()
            .position(|&b| micros <= b)
            .unwrap_or(self.buckets.len());
        self.counts[bucket_idx] += 1;
    }

    pub fn counts(&self) -> &[u64] {
        &self.counts
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Approximate percentile, reported as the upper bound of its bucket.
    pub fn percentile(&self, p: f64) -> Duration {
        let total = self.total();
        if total == 0 {
            return Duration::ZERO;
        }

        let target = (total as f64 * p / 100.0).ceil() as u64;
        let mut cumulative = 0u64;

        for (i, &count) in self.counts.iter().enumerate() {
            cumulative += count;
            if cumulative >= target {
                let micros = if i < self.buckets.len() {
                    self.buckets[i]
                } else {
                    self.buckets.last().copied().unwrap_or(0) * 10
                };
                return Duration::from_micros(micros);
            }
        }

        Duration::ZERO
    }

    pub fn p50(&self) -> Duration {
        self.percentile(50.0)
    }

    pub fn p99(&self) -> Duration {
        self.percentile(99.0)
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // 1ms, 10ms, 100ms, 1s, 10s, 60s
        Self::with_buckets(vec![1_000, 10_000, 100_000, 1_000_000, 10_000_000, 60_000_000])
    }
}

/// Point-in-time copy of [`TransportMetrics`].
#[derive(Debug, Clone)]
pub struct TransportSnapshot {
    pub enqueued: u64,
    pub batches_sent: u64,
    pub items_sent: u64,
    pub bytes_sent: u64,
    pub failed_flushes: u64,
    pub dropped_items: u64,
    pub flush_latency: Histogram,
    pub ops: HashMap<String, OpMetrics>,
    pub uptime: Duration,
}

impl TransportSnapshot {
    /// Format as a human-readable report.
    pub fn format_report(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Weave Transport ===\n\n");
        report.push_str(&format!("Uptime: {:.2?}\n", self.uptime));
        report.push_str(&format!(
            "Items: {} enqueued, {} sent, {} dropped\n",
            self.enqueued, self.items_sent, self.dropped_items
        ));
        report.push_str(&format!(
            "Batches: {} sent ({} bytes), {} failed\n",
            self.batches_sent, self.bytes_sent, self.failed_flushes
        ));
        report.push_str(&format!(
            "Flush latency: p50 {:.2?}, p99 {:.2?}\n",
            self.flush_latency.p50(),
            self.flush_latency.p99()
        ));

        if !self.ops.is_empty() {
            let mut names: Vec<&String> = self.ops.keys().collect();
            names.sort();

            report.push_str("\nOps:\n");
            for name in names {
                let metrics = &self.ops[name];
                report.push_str(&format!(
                    "  {}: {} calls, {} failed, avg {:.2?}\n",
                    name,
                    metrics.calls,
                    metrics.failures,
                    metrics.avg_duration()
                ));
            }
        }

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transport_counters() {
        let metrics = TransportMetrics::new();
        metrics.record_enqueued();
        metrics.record_enqueued();
        metrics.record_batch_sent(2, 300, Duration::from_millis(5));
        metrics.record_flush_failed(Duration::from_millis(50));
        metrics.record_dropped();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.enqueued, 2);
        assert_eq!(snapshot.batches_sent, 1);
        assert_eq!(snapshot.items_sent, 2);
        assert_eq!(snapshot.bytes_sent, 300);
        assert_eq!(snapshot.failed_flushes, 1);
        assert_eq!(snapshot.dropped_items, 1);
        assert_eq!(snapshot.flush_latency.total(), 2);
    }

    #[test]
    fn test_op_metrics() {
        let metrics = TransportMetrics::new();
        metrics.record_call("summarize", Duration::from_millis(10), true);
        metrics.record_call("summarize", Duration::from_millis(30), false);

        let op = metrics.op_metrics("summarize").unwrap();
        assert_eq!(op.calls, 2);
        assert_eq!(op.failures, 1);
        assert_eq!(op.avg_duration(), Duration::from_millis(20));
        assert!(metrics.op_metrics("other").is_none());
    }

    #[test]
    fn test_histogram_percentiles() {
        let mut hist = Histogram::default();
        for _ in 0..100 {
            hist.record(Duration::from_micros(500));
        }
        assert_eq!(hist.p50(), Duration::from_millis(1));
        assert_eq!(hist.p99(), Duration::from_millis(1));
    }

    #[test]
    fn test_histogram_overflow_bucket() {
        let mut hist = Histogram::with_buckets(vec![10]);
        hist.record(Duration::from_micros(100));
        assert_eq!(hist.counts(), &[0, 1]);
        assert_eq!(hist.p50(), Duration::from_micros(100));
    }

    #[test]
    fn test_format_report() {
        let metrics = TransportMetrics::new();
        metrics.record_batch_sent(3, 120, Duration::from_millis(2));
        metrics.record_call("embed", Duration::from_millis(1), true);

        let report = metrics.snapshot().format_report();
        assert!(report.contains("3 sent"));
        assert!(report.contains("embed: 1 calls"));
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Batched delivery: size bounds, retries, draining and halting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Map};
use weave::batch::BatchProcessor;
use weave::server::{CallBatchItem, CallCreateBatchReq, CallStartReq, StartedCallSchemaForInsert};
use weave::telemetry::TransportMetrics;
use weave::{op_with, BatchConfig, CallState, InMemoryTraceServer, OpOptions, WeaveClient};

fn start_item(id: &str, payload_bytes: usize) -> CallBatchItem {
    let mut inputs = Map::new();
    inputs.insert("text".to_string(), json!("x".repeat(payload_bytes)));
    CallBatchItem::Start(CallStartReq {
        start: StartedCallSchemaForInsert {
            project_id: "acme/chat".to_string(),
            id: id.to_string(),
            op_name: "step".to_string(),
            display_name: None,
            trace_id: "trace".to_string(),
            parent_id: None,
            started_at: Utc::now(),
            attributes: Map::new(),
            inputs,
        },
    })
}

fn processor(server: Arc<InMemoryTraceServer>, config: BatchConfig) -> BatchProcessor {
    BatchProcessor::new(server, config, Arc::new(TransportMetrics::new()))
}

#[tokio::test]
async fn test_batches_stay_under_size_limit() {
    let server = Arc::new(InMemoryTraceServer::new());
    let limit = 4_096;
    let batch = processor(server.clone(), BatchConfig::testing().with_size_limit(limit));

    for i in 0..12 {
        batch.enqueue(start_item(&format!("call-{}", i), 1_000));
    }
    batch.drain().await;

    let batches = server.batches();
    assert!(batches.len() >= 2);
    for items in &batches {
        let body = serde_json::to_vec(&CallCreateBatchReq {
            batch: items.clone(),
        })
        .unwrap();
        assert!(body.len() <= limit, "batch of {} bytes", body.len());
    }
    assert_eq!(server.delivered_items().len(), 12);
}

#[tokio::test]
async fn test_retry_preserves_order() {
    let server = Arc::new(InMemoryTraceServer::new());
    server.fail_next_upserts(1);
    let batch = processor(server.clone(), BatchConfig::testing());

    let ids: Vec<String> = (0..6).map(|i| format!("call-{}", i)).collect();
    for id in &ids {
        batch.enqueue(start_item(id, 10));
    }
    batch.drain().await;

    let delivered: Vec<String> = server
        .delivered_items()
        .iter()
        .map(|item| item.call_id().to_string())
        .collect();
    assert_eq!(delivered, ids);
    assert_eq!(server.request_counts().call_upsert_batch, 2);
    assert_eq!(batch.queue_len(), 0);
}

#[tokio::test]
async fn test_wait_resolves_after_retry_delivers() {
    let server = Arc::new(InMemoryTraceServer::new());
    server.fail_next_upserts(2);
    let client =
        WeaveClient::with_batch_config(server.clone(), "acme/chat", BatchConfig::testing());
    let step = op_with(
        |(n,): (i64,)| async move { Ok::<_, String>(n + 1) },
        OpOptions::new().name("step").client(client.clone()),
    );

    for n in 0..3 {
        step.call((n,)).await.unwrap();
    }
    client.wait_for_batch_processing().await;

    assert_eq!(client.batch_processor().queue_len(), 0);
    assert_eq!(client.batch_processor().pending_flushes(), 0);
    let calls = server.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|c| c.state() == CallState::Finished));

    let snapshot = client.transport_metrics().snapshot();
    assert_eq!(snapshot.failed_flushes, 2);
    assert_eq!(snapshot.items_sent, 6);
}

#[tokio::test]
async fn test_halts_after_consecutive_failures() {
    let server = Arc::new(InMemoryTraceServer::new());
    server.set_upserts_failing(true);
    let config = BatchConfig::testing().with_max_consecutive_errors(2);
    let batch = processor(server.clone(), config);

    batch.enqueue(start_item("a", 10));
    batch.enqueue(start_item("b", 10));
    tokio::time::timeout(Duration::from_secs(5), batch.drain())
        .await
        .unwrap();

    assert!(batch.is_halted());
    assert_eq!(batch.queue_len(), 2);
    assert_eq!(server.request_counts().call_upsert_batch, 3);

    // Halted processors keep queueing but stop sending.
    batch.enqueue(start_item("c", 10));
    batch.drain().await;
    assert_eq!(batch.queue_len(), 3);
    assert_eq!(server.request_counts().call_upsert_batch, 3);
}

#[tokio::test]
async fn test_oversized_item_is_dropped_and_logged() {
    let server = Arc::new(InMemoryTraceServer::new());
    let dir = tempfile::tempdir().unwrap();
    let log_path = dir.path().join("errors.log");
    let config = BatchConfig::testing()
        .with_size_limit(1_024)
        .with_error_log(Some(log_path.clone()));
    let batch = processor(server.clone(), config);

    batch.enqueue(start_item("small", 10));
    batch.enqueue(start_item("huge", 4_096));
    batch.enqueue(start_item("after", 10));
    batch.drain().await;

    let delivered: Vec<String> = server
        .delivered_items()
        .iter()
        .map(|item| item.call_id().to_string())
        .collect();
    assert_eq!(delivered, vec!["small", "after"]);

    let log = std::fs::read_to_string(&log_path).unwrap();
    assert!(log.contains("\"call_id\":\"huge\""));
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Streaming ops finish their call exactly once.

use std::sync::Arc;

use futures_util::{stream, StreamExt};
use serde_json::json;
use weave::{
    op_with, BatchConfig, CallState, InMemoryTraceServer, OpOptions, StreamReducer, WeaveClient,
    WeaveValue,
};

fn setup() -> (WeaveClient, Arc<InMemoryTraceServer>) {
    let server = Arc::new(InMemoryTraceServer::new());
    let client =
        WeaveClient::with_batch_config(server.clone(), "acme/chat", BatchConfig::testing());
    (client, server)
}

fn token_counter() -> StreamReducer {
    StreamReducer::new(0, |acc, _item| {
        WeaveValue::from(json!(acc.as_i64().unwrap_or(0) + 1))
    })
}

#[tokio::test]
async fn test_exhausted_stream_finishes_once() {
    let (client, server) = setup();
    let generate = op_with(
        |(prompt,): (String,)| async move {
            let tokens: Vec<String> = prompt.split(' ').map(str::to_string).collect();
            Ok::<_, String>(stream::iter(tokens))
        },
        OpOptions::new()
            .name("generate")
            .client(client.clone())
            .stream_reducer(token_counter()),
    );

    let tokens: Vec<String> = generate
        .call_stream(("the quick brown fox".to_string(),))
        .await
        .unwrap()
        .collect()
        .await;
    assert_eq!(tokens.len(), 4);
    client.wait_for_batch_processing().await;

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].state(), CallState::Finished);
    assert_eq!(calls[0].output, Some(json!(4)));
}

#[tokio::test]
async fn test_early_break_finishes_once() {
    let (client, server) = setup();
    let generate = op_with(
        |_: ()| async { Ok::<_, String>(stream::iter(vec!["a", "b", "c", "d"])) },
        OpOptions::new()
            .name("generate")
            .client(client.clone())
            .stream_reducer(StreamReducer::concat()),
    );

    let mut chunks = generate.call_stream(()).await.unwrap();
    while let Some(chunk) = chunks.next().await {
        if chunk == "a" {
            break;
        }
    }
    drop(chunks);
    client.wait_for_batch_processing().await;

    let calls = server.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].state(), CallState::Finished);
    assert_eq!(calls[0].output, Some(json!("a")));
}

#[tokio::test]
async fn test_ops_inside_stream_nest_under_it() {
    let (client, server) = setup();
    let score = Arc::new(op_with(
        |(n,): (i64,)| async move { Ok::<_, String>(n * n) },
        OpOptions::new().name("score").client(client.clone()),
    ));
    let scores = {
        let score = score.clone();
        op_with(
            move |(n,): (i64,)| {
                let score = score.clone();
                async move {
                    let items = stream::iter(0..n).then(move |i| {
                        let score = score.clone();
                        async move { score.call((i,)).await.unwrap_or_default() }
                    });
                    Ok::<_, String>(items)
                }
            },
            OpOptions::new().name("scores").client(client.clone()),
        )
    };

    let values: Vec<i64> = scores.call_stream((3,)).await.unwrap().collect().await;
    assert_eq!(values, vec![0, 1, 4]);
    client.wait_for_batch_processing().await;

    let calls = server.calls();
    assert_eq!(calls.len(), 4);
    let stream_call = calls.iter().find(|c| c.parent_id.is_none()).unwrap();
    assert_eq!(stream_call.output, Some(json!([0, 1, 4])));
    let children = calls
        .iter()
        .filter(|c| c.parent_id.as_deref() == Some(stream_call.id.as_str()))
        .count();
    assert_eq!(children, 3);
}

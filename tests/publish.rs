// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Publishing objects and datasets, and reading them back.

use std::sync::Arc;

use serde_json::json;
use weave::{
    op_with, BatchConfig, Dataset, InMemoryTraceServer, Media, OpOptions, Reference, WeaveClient,
    WeaveObject, WeaveValue,
};

fn setup() -> (WeaveClient, Arc<InMemoryTraceServer>) {
    let server = Arc::new(InMemoryTraceServer::new());
    let client =
        WeaveClient::with_batch_config(server.clone(), "acme/chat", BatchConfig::testing());
    (client, server)
}

fn prompt() -> WeaveObject {
    WeaveObject::builder("Prompt")
        .name("system-prompt")
        .attribute("text", "You are terse.")
        .attribute("version", 2)
        .build()
}

#[tokio::test]
async fn test_publish_twice_creates_once() {
    let (client, server) = setup();
    let object = prompt();

    let (first, second) = tokio::join!(client.publish(&object), client.publish(&object));
    let (first, second) = (first.unwrap(), second.unwrap());
    assert_eq!(first, second);
    assert_eq!(client.publish(&object).await.unwrap(), first);
    assert_eq!(server.request_counts().obj_create, 1);
}

#[tokio::test]
async fn test_identical_instances_share_digest() {
    let (client, _) = setup();
    let a = client.publish(&prompt()).await.unwrap();
    let b = client.publish(&prompt()).await.unwrap();

    let (a, b) = (a.as_object().unwrap(), b.as_object().unwrap());
    assert_eq!(a.digest, b.digest);
    assert_eq!(a.object_id, "system-prompt");
}

#[tokio::test]
async fn test_dataset_round_trip_with_row_refs() {
    let (client, server) = setup();
    let rows = vec![
        WeaveValue::from(json!({"question": "2+2", "expected": "4"})),
        WeaveValue::from(json!({"question": "3*3", "expected": "9"})),
        WeaveValue::from(json!({"question": "10/2", "expected": "5"})),
    ];
    let dataset = Dataset::new("arithmetic", rows.clone());

    let reference = client.publish(&dataset).await.unwrap();
    let uri = reference.uri();
    assert!(uri.starts_with("weave:///acme/chat/object/arithmetic:"));
    assert_eq!(server.table_count(), 1);

    let parsed: Reference = uri.parse().unwrap();
    let fetched = client.get_dataset(parsed.as_object().unwrap()).await.unwrap();
    assert_eq!(fetched.rows().rows(), rows.as_slice());

    let row_refs = fetched.rows().row_refs();
    assert_eq!(row_refs.len(), 3);
    let table_ref = fetched.rows().saved_ref().unwrap();
    for row_ref in &row_refs {
        assert_eq!(Reference::Table(row_ref.table.clone()), table_ref);
        assert!(row_ref.uri().starts_with(&format!("{}/id/", table_ref.uri())));
    }
    assert_eq!(row_refs, dataset.rows().row_refs());
}

#[tokio::test]
async fn test_call_inputs_embed_object_refs() {
    let (client, server) = setup();
    let object = prompt();
    let render = op_with(
        |(prompt, user): (WeaveObject, String)| async move {
            let text = prompt
                .get("text")
                .and_then(WeaveValue::as_str)
                .unwrap_or_default()
                .to_string();
            Ok::<_, String>(format!("{}\n{}", text, user))
        },
        OpOptions::new().name("render").client(client.clone()),
    );

    render.call((object.clone(), "hi".to_string())).await.unwrap();
    render.call((object.clone(), "again".to_string())).await.unwrap();
    client.wait_for_batch_processing().await;

    let reference = object.saved_ref().unwrap();
    for call in server.calls() {
        assert_eq!(call.inputs["arg0"], json!(reference.uri()));
    }
    // Two calls, one object save, one op save.
    assert_eq!(server.request_counts().obj_create, 2);
}

#[tokio::test]
async fn test_call_output_embeds_media_placeholder() {
    let (client, server) = setup();
    let draw = op_with(
        |_: ()| async { Ok::<_, String>(Media::image_png(vec![1, 2, 3, 4])) },
        OpOptions::new().name("draw").client(client.clone()),
    );

    let image = draw.call(()).await.unwrap();
    client.wait_for_batch_processing().await;

    let digest = image.file_digest().unwrap();
    let call = &server.calls()[0];
    assert_eq!(call.output, Some(image.placeholder(&digest)));
    assert_eq!(server.file("acme/chat", &digest), Some(vec![1, 2, 3, 4]));
}

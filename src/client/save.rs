// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reference-tracking saver.
//!
//! Saving runs in two phases. [`WeaveClient::trigger_saves`] walks a value
//! synchronously and starts the save of every trackable entity it reaches,
//! children first, filling each entity's slot before returning. Later,
//! [`WeaveClient::serialize`] converts the value to JSON, awaiting those
//! slots and embedding references in place of the entities. Serializing an
//! entity whose save was never started is an error.

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use super::WeaveClient;
use crate::digest::sanitize_object_name;
use crate::error::WeaveError;
use crate::refs::{ObjectRef, Reference, TableRef};
use crate::server::{
    FileCreateReq, ObjCreateReq, ObjSchemaForInsert, TableCreateReq, TableQueryReq,
    TableSchemaForInsert,
};
use crate::value::{
    Media, OpDef, Pending, SaveSlot, Table, ToWeaveValue, WeaveObject, WeaveValue, OP_FILE_NAME,
};

/// Base classes recorded on every published object.
const OBJECT_BASES: [&str; 2] = ["Object", "BaseModel"];

impl WeaveClient {
    /// Start saving every trackable entity inside `value` that is not saved yet.
    ///
    /// Returns without waiting; the saves run in the background.
    pub(crate) fn trigger_saves(&self, value: &WeaveValue) {
        match value {
            WeaveValue::List(items) => items.iter().for_each(|item| self.trigger_saves(item)),
            WeaveValue::Map(map) => map.values().for_each(|item| self.trigger_saves(item)),
            WeaveValue::Object(object) => {
                let _ = self.save_object(object);
            }
            WeaveValue::Table(table) => {
                let _ = self.save_table(table);
            }
            WeaveValue::Media(media) => {
                let _ = self.save_media(media);
            }
            WeaveValue::Op(op) => {
                let _ = self.save_op(op);
            }
            WeaveValue::Null
            | WeaveValue::Bool(_)
            | WeaveValue::Number(_)
            | WeaveValue::String(_)
            | WeaveValue::Ref(_) => {}
        }
    }

    pub(crate) fn save_object(&self, object: &WeaveObject) -> Pending<Reference> {
        if let Some(pending) = object.slot().get() {
            return pending;
        }
        // Children first, so their slots are filled before the parent serializes.
        for value in object.attributes().values() {
            self.trigger_saves(value);
        }
        let client = self.clone();
        let object = object.clone();
        self.start_save(object.slot(), || {
            let object = object.clone();
            async move { client.create_object(&object).await }.boxed()
        })
    }

    pub(crate) fn save_table(&self, table: &Table) -> Pending<Reference> {
        if let Some(pending) = table.slot().get() {
            return pending;
        }
        for row in table.rows() {
            self.trigger_saves(row);
        }
        let client = self.clone();
        self.start_save(table.slot(), || {
            let table = table.clone();
            async move { client.create_table(&table).await }.boxed()
        })
    }

    pub(crate) fn save_media(&self, media: &Media) -> Pending<String> {
        let client = self.clone();
        self.start_save(media.slot(), || {
            let media = media.clone();
            async move { client.create_media(&media).await }.boxed()
        })
    }

    pub(crate) fn save_op(&self, op: &OpDef) -> Pending<Reference> {
        let client = self.clone();
        self.start_save(op.slot(), || {
            let op = op.clone();
            async move { client.create_op(&op).await }.boxed()
        })
    }

    /// Install a save in `slot` unless one exists, and drive it in the background.
    fn start_save<T, F>(&self, slot: &SaveSlot<T>, start: F) -> Pending<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> BoxFuture<'static, Result<T, WeaveError>>,
    {
        let (pending, started) = slot.get_or_start(start);
        if started {
            let driver = pending.clone();
            self.spawn_tracked(async move {
                if let Err(e) = driver.await {
                    warn!(error = %e, "Background save failed");
                }
            });
        }
        pending
    }

    async fn create_object(&self, object: &WeaveObject) -> Result<Reference, WeaveError> {
        let object_id = sanitize_object_name(object.object_name())?;

        let mut val = Map::new();
        val.insert("_type".to_string(), json!(object.class_name()));
        val.insert("_class_name".to_string(), json!(object.class_name()));
        val.insert("_bases".to_string(), json!(OBJECT_BASES));
        if let Some(name) = object.name() {
            val.insert("name".to_string(), json!(name));
        }
        if let Some(description) = object.description() {
            val.insert("description".to_string(), json!(description));
        }
        for (key, value) in object.attributes() {
            val.insert(key.clone(), self.serialize(value).await?);
        }

        let res = self
            .server()
            .obj_create(ObjCreateReq {
                obj: ObjSchemaForInsert {
                    project_id: self.project_id().to_string(),
                    object_id: object_id.clone(),
                    val: Value::Object(val),
                },
            })
            .await?;
        debug!(object_id = %object_id, digest = %res.digest, "Object saved");
        Ok(ObjectRef::new(self.project_id(), object_id, res.digest).into())
    }

    async fn create_table(&self, table: &Table) -> Result<Reference, WeaveError> {
        let mut rows = Vec::with_capacity(table.len());
        for row in table.rows() {
            rows.push(self.serialize(row).await?);
        }

        let res = self
            .server()
            .table_create(TableCreateReq {
                table: TableSchemaForInsert {
                    project_id: self.project_id().to_string(),
                    rows,
                },
            })
            .await?;
        let table_ref = TableRef::new(self.project_id(), res.digest);

        // Servers that do not report row digests are asked for them.
        let row_digests = if res.row_digests.len() == table.len() {
            res.row_digests
        } else {
            self.server()
                .table_query(TableQueryReq {
                    project_id: self.project_id().to_string(),
                    digest: table_ref.digest.clone(),
                })
                .await?
                .rows
                .into_iter()
                .map(|row| row.digest)
                .collect()
        };
        table.set_row_refs(row_digests.into_iter().map(|d| table_ref.row(d)).collect());

        debug!(digest = %table_ref.digest, rows = table.len(), "Table saved");
        Ok(Reference::Table(table_ref))
    }

    async fn create_media(&self, media: &Media) -> Result<String, WeaveError> {
        let res = self
            .server()
            .file_create(FileCreateReq {
                project_id: self.project_id().to_string(),
                name: media.kind().file_name(),
                content: media.data().to_vec(),
            })
            .await?;
        debug!(digest = %res.digest, bytes = media.data().len(), "Media saved");
        Ok(res.digest)
    }

    async fn create_op(&self, op: &OpDef) -> Result<Reference, WeaveError> {
        let object_id = sanitize_object_name(op.name())?;

        let file = self
            .server()
            .file_create(FileCreateReq {
                project_id: self.project_id().to_string(),
                name: OP_FILE_NAME.to_string(),
                content: op.body().into_bytes(),
            })
            .await?;

        let val = json!({
            "_type": "CustomWeaveType",
            "weave_type": {"type": "Op"},
            "files": {OP_FILE_NAME: file.digest},
        });
        let res = self
            .server()
            .obj_create(ObjCreateReq {
                obj: ObjSchemaForInsert {
                    project_id: self.project_id().to_string(),
                    object_id: object_id.clone(),
                    val,
                },
            })
            .await?;
        debug!(op = %object_id, digest = %res.digest, "Op saved");
        Ok(ObjectRef::op(self.project_id(), object_id, res.digest).into())
    }

    /// Convert a value to its persisted JSON form.
    ///
    /// Trackable entities are replaced by their reference URI (media by its
    /// placeholder descriptor), awaiting any save still in flight. Fails with
    /// [`WeaveError::NotSaved`] if an entity's save was never triggered.
    pub(crate) fn serialize<'a>(
        &'a self,
        value: &'a WeaveValue,
    ) -> BoxFuture<'a, Result<Value, WeaveError>> {
        async move {
            let json = match value {
                WeaveValue::Null => Value::Null,
                WeaveValue::Bool(b) => Value::Bool(*b),
                WeaveValue::Number(n) => Value::Number(n.clone()),
                WeaveValue::String(s) => Value::String(s.clone()),
                WeaveValue::List(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.serialize(item).await?);
                    }
                    Value::Array(out)
                }
                WeaveValue::Map(map) => {
                    let mut out = Map::new();
                    for (key, item) in map {
                        out.insert(key.clone(), self.serialize(item).await?);
                    }
                    Value::Object(out)
                }
                WeaveValue::Object(object) => {
                    let pending = object.slot().get().ok_or(WeaveError::NotSaved { kind: "Object" })?;
                    Value::String(pending.await?.uri())
                }
                WeaveValue::Table(table) => {
                    let pending = table.slot().get().ok_or(WeaveError::NotSaved { kind: "Table" })?;
                    Value::String(pending.await?.uri())
                }
                WeaveValue::Op(op) => {
                    let pending = op.slot().get().ok_or(WeaveError::NotSaved { kind: "Op" })?;
                    Value::String(pending.await?.uri())
                }
                WeaveValue::Media(media) => {
                    let pending = media.slot().get().ok_or(WeaveError::NotSaved { kind: "Media" })?;
                    media.placeholder(&pending.await?)
                }
                WeaveValue::Ref(reference) => Value::String(reference.uri()),
            };
            Ok(json)
        }
        .boxed()
    }

    /// Serialize for a call record, falling back to plain JSON on failure.
    ///
    /// A failed save must not lose the call itself.
    pub(crate) async fn serialize_or_plain(&self, value: &WeaveValue) -> Value {
        match self.serialize(value).await {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize call value; recording plain form");
                value.to_plain_json()
            }
        }
    }

    /// Publish an object, dataset, table or op and wait for its reference.
    ///
    /// Publishing the same in-memory value again returns the same reference
    /// without another request.
    pub async fn publish(&self, value: &impl ToWeaveValue) -> Result<Reference, WeaveError> {
        let value = value.to_weave_value();
        let pending = match &value {
            WeaveValue::Object(object) => self.save_object(object),
            WeaveValue::Table(table) => self.save_table(table),
            WeaveValue::Op(op) => self.save_op(op),
            WeaveValue::Ref(reference) => return Ok(reference.clone()),
            _ => {
                return Err(WeaveError::Serialization(
                    "only objects, datasets, tables and ops can be published; use publish_value for plain data"
                        .to_string(),
                ))
            }
        };
        pending.await
    }

    /// Publish arbitrary data as a named object.
    ///
    /// Trackable entities inside `value` are saved first and embedded by reference.
    pub async fn publish_value(
        &self,
        name: &str,
        value: &impl ToWeaveValue,
    ) -> Result<Reference, WeaveError> {
        let object_id = sanitize_object_name(name)?;
        let value = value.to_weave_value();
        self.trigger_saves(&value);
        let val = self.serialize(&value).await?;

        let res = self
            .server()
            .obj_create(ObjCreateReq {
                obj: ObjSchemaForInsert {
                    project_id: self.project_id().to_string(),
                    object_id: object_id.clone(),
                    val,
                },
            })
            .await?;
        Ok(ObjectRef::new(self.project_id(), object_id, res.digest).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::digest::compute_digest;
    use crate::server::InMemoryTraceServer;
    use std::sync::Arc;

    fn client() -> (WeaveClient, Arc<InMemoryTraceServer>) {
        let server = Arc::new(InMemoryTraceServer::new());
        let client =
            WeaveClient::with_batch_config(server.clone(), "acme/chat", BatchConfig::testing());
        (client, server)
    }

    #[tokio::test]
    async fn test_publish_object_once() {
        let (client, server) = client();
        let object = WeaveObject::builder("Prompt")
            .name("greeting")
            .attribute("template", "Hello {name}")
            .build();

        let first = client.publish(&object).await.unwrap();
        let second = client.publish(&object).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(server.request_counts().obj_create, 1);
        assert_eq!(object.saved_ref(), Some(first.clone()));

        let stored = server
            .object("acme/chat", "greeting", &first.as_object().unwrap().digest)
            .unwrap();
        assert_eq!(stored["template"], json!("Hello {name}"));
        assert_eq!(stored["_class_name"], json!("Prompt"));
    }

    #[tokio::test]
    async fn test_identical_objects_share_digest() {
        let (client, _) = client();
        let build = || {
            WeaveObject::builder("Model")
                .name("gpt")
                .attribute("temperature", 0.5)
                .build()
        };

        let a = client.publish(&build()).await.unwrap();
        let b = client.publish(&build()).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn test_trigger_saves_walks_lists_and_maps() {
        let (client, server) = client();
        let object = WeaveObject::builder("Prompt").name("p").build();
        let media = Media::image_png(vec![7, 7]);
        let value = WeaveValue::List(vec![
            object.to_weave_value(),
            WeaveValue::map([("image", media.to_weave_value())]),
        ]);

        client.trigger_saves(&value);
        client.trigger_saves(&value);
        client.wait_for_batch_processing().await;

        assert!(object.saved_ref().is_some());
        assert_eq!(server.request_counts().obj_create, 1);
        let digest = media.file_digest().unwrap();
        assert_eq!(server.file("acme/chat", &digest), Some(vec![7, 7]));
    }

    #[tokio::test]
    async fn test_nested_objects_saved_before_parent() {
        let (client, server) = client();
        let inner = WeaveObject::builder("Tokenizer").name("bpe").build();
        let outer = WeaveObject::builder("Model")
            .name("chat")
            .attribute("tokenizer", inner.clone())
            .build();

        let outer_ref = client.publish(&outer).await.unwrap();
        let inner_ref = inner.saved_ref().unwrap();

        let stored = server
            .object("acme/chat", "chat", &outer_ref.as_object().unwrap().digest)
            .unwrap();
        assert_eq!(stored["tokenizer"], json!(inner_ref.uri()));
    }

    #[tokio::test]
    async fn test_serialize_untriggered_entity_fails() {
        let (client, _) = client();
        let table = Table::new(vec![WeaveValue::from(json!({"a": 1}))]);
        let err = client.serialize(&WeaveValue::Table(table)).await.unwrap_err();
        assert!(matches!(err, WeaveError::NotSaved { kind: "Table" }));
        assert!(err.is_programming_fault());
    }

    #[tokio::test]
    async fn test_table_row_refs_after_save() {
        let (client, server) = client();
        let rows = vec![
            WeaveValue::from(json!({"q": "1+1"})),
            WeaveValue::from(json!({"q": "2+2"})),
        ];
        let table = Table::new(rows);

        let reference = client.publish(&table).await.unwrap();
        let table_ref = reference.as_table().unwrap();
        let row_refs = table.row_refs();
        assert_eq!(row_refs.len(), 2);
        assert_eq!(row_refs[0].table, *table_ref);
        assert_eq!(row_refs[0].row_digest, compute_digest(&json!({"q": "1+1"})));
        assert_eq!(server.request_counts().table_query, 0);
    }

    #[tokio::test]
    async fn test_table_row_refs_queried_when_not_reported() {
        let (client, server) = client();
        server.set_report_row_digests(false);
        let table = Table::new(vec![WeaveValue::from(json!({"q": "x"}))]);

        client.publish(&table).await.unwrap();
        assert_eq!(table.row_refs().len(), 1);
        assert_eq!(server.request_counts().table_query, 1);
    }

    #[tokio::test]
    async fn test_media_embedded_as_placeholder() {
        let (client, server) = client();
        let image = Media::image_png(vec![0x89, b'P', b'N', b'G']);
        let value = WeaveValue::map([("image", WeaveValue::Media(image.clone()))]);

        client.trigger_saves(&value);
        let json = client.serialize(&value).await.unwrap();
        let digest = image.file_digest().unwrap();
        assert_eq!(json["image"], image.placeholder(&digest));
        assert!(server.file("acme/chat", &digest).is_some());
    }

    #[tokio::test]
    async fn test_op_saved_as_file_and_object() {
        let (client, server) = client();
        let op = OpDef::new("score answer", "tests::score_answer");

        let reference = client.publish(&op).await.unwrap();
        let uri = reference.uri();
        assert!(uri.starts_with("weave:///acme/chat/op/score-answer:"));

        let counts = server.request_counts();
        assert_eq!(counts.file_create, 1);
        assert_eq!(counts.obj_create, 1);
    }

    #[tokio::test]
    async fn test_invalid_object_name_rejected() {
        let (client, _) = client();
        let object = WeaveObject::builder("Thing").name("///").build();
        let err = client.publish(&object).await.unwrap_err();
        assert!(matches!(err, WeaveError::InvalidObjectName(_)));
    }

    #[tokio::test]
    async fn test_publish_plain_value() {
        let (client, server) = client();
        let err = client.publish(&json!({"a": 1})).await.unwrap_err();
        assert!(matches!(err, WeaveError::Serialization(_)));

        let reference = client.publish_value("settings", &json!({"a": 1})).await.unwrap();
        let object_ref = reference.as_object().unwrap();
        assert_eq!(object_ref.object_id, "settings");
        assert_eq!(
            server.object("acme/chat", "settings", &object_ref.digest).unwrap(),
            json!({"a": 1})
        );
    }

    #[tokio::test]
    async fn test_failed_save_falls_back_to_plain() {
        let (client, _) = client();
        let object = WeaveObject::builder("Thing").name("!!!").build();
        let value = WeaveValue::Object(object);
        client.trigger_saves(&value);

        assert_eq!(client.serialize_or_plain(&value).await, Value::Null);
        client.wait_for_batch_processing().await;
    }
}

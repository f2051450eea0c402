// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Reading published objects back.

use std::str::FromStr;

use futures_util::future::{BoxFuture, FutureExt};
use serde_json::{Map, Value};
use tracing::debug;

use super::WeaveClient;
use crate::error::{TraceServerError, WeaveError};
use crate::refs::{ObjectRef, Reference, TableRef};
use crate::server::{ObjReadReq, TableQueryReq};
use crate::value::{Dataset, Table, WeaveObject, WeaveValue};

/// Keys of an object's stored form that are not attributes.
const RESERVED_KEYS: [&str; 2] = ["name", "description"];

impl WeaveClient {
    /// Fetch a published object and rebuild it.
    ///
    /// Objects come back as [`WeaveValue::Object`] already bound to `reference`,
    /// tables are fetched with their row references, and references to other
    /// objects are left as [`WeaveValue::Ref`].
    pub async fn get(&self, reference: &ObjectRef) -> Result<WeaveValue, WeaveError> {
        let res = self
            .server()
            .obj_read(ObjReadReq {
                project_id: reference.project_id.clone(),
                object_id: reference.object_id.clone(),
                digest: reference.digest.clone(),
            })
            .await
            .map_err(|e| match e {
                TraceServerError::NotFound(_) => WeaveError::ObjectNotFound(reference.uri()),
                other => WeaveError::TraceServer(other),
            })?;
        debug!(uri = %reference.uri(), "Object read");

        match res.obj.val {
            Value::Object(map) if is_class_object(&map) => {
                Ok(WeaveValue::Object(self.rebuild_object(map, reference).await?))
            }
            other => self.rehydrate(other).await,
        }
    }

    /// Fetch a published dataset.
    pub async fn get_dataset(&self, reference: &ObjectRef) -> Result<Dataset, WeaveError> {
        match self.get(reference).await? {
            WeaveValue::Object(object) => Dataset::from_object(object).ok_or_else(|| {
                WeaveError::InvalidRef(format!("{} is not a dataset", reference.uri()))
            }),
            _ => Err(WeaveError::InvalidRef(format!(
                "{} is not a dataset",
                reference.uri()
            ))),
        }
    }

    async fn rebuild_object(
        &self,
        map: Map<String, Value>,
        reference: &ObjectRef,
    ) -> Result<WeaveObject, WeaveError> {
        let class_name = map
            .get("_class_name")
            .or_else(|| map.get("_type"))
            .and_then(Value::as_str)
            .unwrap_or("Object")
            .to_string();

        let mut builder = WeaveObject::builder(class_name);
        if let Some(name) = map.get("name").and_then(Value::as_str) {
            builder = builder.name(name);
        }
        if let Some(description) = map.get("description").and_then(Value::as_str) {
            builder = builder.description(description);
        }
        for (key, value) in map {
            if key.starts_with('_') || RESERVED_KEYS.contains(&key.as_str()) {
                continue;
            }
            builder = builder.attribute(key, self.rehydrate(value).await?);
        }
        Ok(builder.build_saved(Reference::Object(reference.clone())))
    }

    /// Turn stored JSON back into a value, fetching tables it references.
    fn rehydrate(&self, value: Value) -> BoxFuture<'_, Result<WeaveValue, WeaveError>> {
        async move {
            match value {
                Value::String(s) if Reference::is_uri(&s) => match Reference::from_str(&s)? {
                    Reference::Table(table_ref) => {
                        Ok(WeaveValue::Table(self.fetch_table(table_ref).await?))
                    }
                    other => Ok(WeaveValue::Ref(other)),
                },
                Value::Array(items) => {
                    let mut out = Vec::with_capacity(items.len());
                    for item in items {
                        out.push(self.rehydrate(item).await?);
                    }
                    Ok(WeaveValue::List(out))
                }
                Value::Object(map) => {
                    let mut out = std::collections::BTreeMap::new();
                    for (key, item) in map {
                        out.insert(key, self.rehydrate(item).await?);
                    }
                    Ok(WeaveValue::Map(out))
                }
                other => Ok(WeaveValue::from(other)),
            }
        }
        .boxed()
    }

    async fn fetch_table(&self, table_ref: TableRef) -> Result<Table, WeaveError> {
        let res = self
            .server()
            .table_query(TableQueryReq {
                project_id: table_ref.project_id.clone(),
                digest: table_ref.digest.clone(),
            })
            .await?;

        let mut rows = Vec::with_capacity(res.rows.len());
        let mut row_refs = Vec::with_capacity(res.rows.len());
        for row in res.rows {
            row_refs.push(table_ref.row(row.digest));
            rows.push(self.rehydrate(row.val).await?);
        }
        Ok(Table::saved(rows, Reference::Table(table_ref), row_refs))
    }
}

fn is_class_object(map: &Map<String, Value>) -> bool {
    map.contains_key("_class_name")
}

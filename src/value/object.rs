// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Named, versioned objects and datasets.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use super::slot::SaveSlot;
use super::table::Table;
use super::{ToWeaveValue, WeaveValue};
use crate::refs::Reference;

/// Class name used for datasets.
pub const DATASET_CLASS: &str = "Dataset";

/// A tracked object: a class name, an optional name, and attributes.
///
/// Published under an object id derived from its name (or class name).
#[derive(Clone)]
pub struct WeaveObject {
    inner: Arc<ObjectInner>,
}

struct ObjectInner {
    class_name: String,
    name: Option<String>,
    description: Option<String>,
    attributes: BTreeMap<String, WeaveValue>,
    slot: SaveSlot<Reference>,
}

impl WeaveObject {
    /// Start building an object of the given class.
    pub fn builder(class_name: impl Into<String>) -> ObjectBuilder {
        ObjectBuilder {
            class_name: class_name.into(),
            name: None,
            description: None,
            attributes: BTreeMap::new(),
        }
    }

    pub fn class_name(&self) -> &str {
        &self.inner.class_name
    }

    pub fn name(&self) -> Option<&str> {
        self.inner.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.inner.description.as_deref()
    }

    pub fn attributes(&self) -> &BTreeMap<String, WeaveValue> {
        &self.inner.attributes
    }

    pub fn get(&self, key: &str) -> Option<&WeaveValue> {
        self.inner.attributes.get(key)
    }

    /// Name the object is published under before sanitization.
    pub fn object_name(&self) -> &str {
        self.inner.name.as_deref().unwrap_or(&self.inner.class_name)
    }

    /// The reference once the object's save has completed.
    pub fn saved_ref(&self) -> Option<Reference> {
        self.inner.slot.resolved()
    }

    pub(crate) fn slot(&self) -> &SaveSlot<Reference> {
        &self.inner.slot
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for WeaveObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeaveObject")
            .field("class_name", &self.inner.class_name)
            .field("name", &self.inner.name)
            .field("attributes", &self.inner.attributes)
            .field("saved", &self.inner.slot.is_started())
            .finish()
    }
}

impl ToWeaveValue for WeaveObject {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Object(self.clone())
    }
}

/// Builder for [`WeaveObject`].
#[derive(Debug)]
pub struct ObjectBuilder {
    class_name: String,
    name: Option<String>,
    description: Option<String>,
    attributes: BTreeMap<String, WeaveValue>,
}

impl ObjectBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn attribute(mut self, key: impl Into<String>, value: impl ToWeaveValue) -> Self {
        self.attributes.insert(key.into(), value.to_weave_value());
        self
    }

    pub fn build(self) -> WeaveObject {
        WeaveObject {
            inner: Arc::new(ObjectInner {
                class_name: self.class_name,
                name: self.name,
                description: self.description,
                attributes: self.attributes,
                slot: SaveSlot::new(),
            }),
        }
    }

    /// Build an object that is already known to be persisted at `reference`.
    pub(crate) fn build_saved(self, reference: Reference) -> WeaveObject {
        let object = self.build();
        object.inner.slot.set_resolved(reference);
        object
    }
}

/// A named collection of rows, backed by a [`Table`].
#[derive(Debug, Clone)]
pub struct Dataset {
    object: WeaveObject,
    rows: Table,
}

impl Dataset {
    /// Create a dataset from row records.
    pub fn new(name: impl Into<String>, rows: Vec<WeaveValue>) -> Self {
        Self::with_table(name, Table::new(rows))
    }

    pub fn with_table(name: impl Into<String>, table: Table) -> Self {
        let object = WeaveObject::builder(DATASET_CLASS)
            .name(name)
            .attribute("rows", WeaveValue::Table(table.clone()))
            .build();
        Self {
            object,
            rows: table,
        }
    }

    /// View an object as a dataset if it has the dataset shape.
    pub fn from_object(object: WeaveObject) -> Option<Self> {
        if object.class_name() != DATASET_CLASS {
            return None;
        }
        let rows = object.get("rows").and_then(WeaveValue::as_table)?.clone();
        Some(Self { object, rows })
    }

    pub fn name(&self) -> Option<&str> {
        self.object.name()
    }

    pub fn rows(&self) -> &Table {
        &self.rows
    }

    pub fn object(&self) -> &WeaveObject {
        &self.object
    }

    pub fn saved_ref(&self) -> Option<Reference> {
        self.object.saved_ref()
    }
}

impl ToWeaveValue for Dataset {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Object(self.object.clone())
    }
}

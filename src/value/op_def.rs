// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Persistable description of an op.

use std::fmt;
use std::sync::Arc;

use super::slot::SaveSlot;
use super::{ToWeaveValue, WeaveValue};
use crate::refs::Reference;

/// File name of the op body blob.
pub const OP_FILE_NAME: &str = "obj.rs";

/// The identity of an op: its resolved name and the signature of the
/// function it wraps. Saved once per op and referenced by every call.
#[derive(Clone)]
pub struct OpDef {
    inner: Arc<OpDefInner>,
}

struct OpDefInner {
    name: String,
    signature: String,
    slot: SaveSlot<Reference>,
}

impl OpDef {
    pub fn new(name: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(OpDefInner {
                name: name.into(),
                signature: signature.into(),
                slot: SaveSlot::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn signature(&self) -> &str {
        &self.inner.signature
    }

    /// Text stored as the op body blob.
    pub fn body(&self) -> String {
        format!("// op: {}\n// fn: {}\n", self.inner.name, self.inner.signature)
    }

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

impl fmt::Debug for OpDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpDef")
            .field("name", &self.inner.name)
            .field("signature", &self.inner.signature)
            .finish()
    }
}

impl ToWeaveValue for OpDef {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Op(self.clone())
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Value model for call inputs, outputs, and published objects.
//!
//! [`WeaveValue`] is a closed set of shapes: plain JSON-like data plus the
//! trackable entities that are persisted separately and embedded by reference
//! ([`WeaveObject`], [`Table`], [`OpDef`]) or by placeholder ([`Media`]).
//! Trackable handles are cheap to clone and share identity, so the same
//! in-memory value is only ever saved once.

mod media;
mod object;
mod op_def;
mod slot;
mod table;

pub use media::{Media, MediaKind};
pub use object::{Dataset, ObjectBuilder, WeaveObject, DATASET_CLASS};
pub use op_def::{OpDef, OP_FILE_NAME};
pub use slot::{Pending, SaveSlot};
pub use table::Table;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Number, Value};

use crate::refs::Reference;

/// A value flowing through a traced call.
#[derive(Debug, Clone, Default)]
pub enum WeaveValue {
    #[default]
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    List(Vec<WeaveValue>),
    Map(BTreeMap<String, WeaveValue>),
    Object(WeaveObject),
    Table(Table),
    Media(Media),
    Op(OpDef),
    /// A reference read back from the server and not rehydrated.
    Ref(Reference),
}

impl WeaveValue {
    /// Build a map value from key/value pairs.
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, WeaveValue)>,
        K: Into<String>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Convert any serializable value; serialization failures become `Null`.
    pub fn from_serialize<T: Serialize + ?Sized>(value: &T) -> Self {
        serde_json::to_value(value).map(Self::from).unwrap_or(Self::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) => n.as_i64(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[WeaveValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, WeaveValue>> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&WeaveObject> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Look up a key in a map value or an object's attributes.
    pub fn get(&self, key: &str) -> Option<&WeaveValue> {
        match self {
            Self::Map(map) => map.get(key),
            Self::Object(obj) => obj.get(key),
            _ => None,
        }
    }

    /// Render plain data as JSON.
    ///
    /// Trackable entities render as their reference URI when already saved,
    /// and as `null` otherwise. Used for display names and summaries, never
    /// for persistence.
    pub fn to_plain_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::List(items) => Value::Array(items.iter().map(Self::to_plain_json).collect()),
            Self::Map(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_plain_json()))
                    .collect(),
            ),
            Self::Object(obj) => obj.saved_ref().map(|r| Value::String(r.uri())).unwrap_or_default(),
            Self::Table(table) => table.saved_ref().map(|r| Value::String(r.uri())).unwrap_or_default(),
            Self::Op(op) => op.saved_ref().map(|r| Value::String(r.uri())).unwrap_or_default(),
            Self::Media(_) => Value::Null,
            Self::Ref(r) => Value::String(r.uri()),
        }
    }
}

impl PartialEq for WeaveValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::List(a), Self::List(b)) => a == b,
            (Self::Map(a), Self::Map(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Table(a), Self::Table(b)) => a.ptr_eq(b),
            (Self::Media(a), Self::Media(b)) => a.ptr_eq(b),
            (Self::Op(a), Self::Op(b)) => a.ptr_eq(b),
            (Self::Ref(a), Self::Ref(b)) => a == b,
            _ => false,
        }
    }
}

impl From<Value> for WeaveValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(b),
            Value::Number(n) => Self::Number(n),
            Value::String(s) => Self::String(s),
            Value::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Value::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

/// Conversion into a [`WeaveValue`] for tracing.
///
/// Implemented for common std types, JSON values, and the trackable handles.
/// Wrap any other `Serialize` type in [`Json`].
pub trait ToWeaveValue {
    fn to_weave_value(&self) -> WeaveValue;
}

/// Adapter tracing any `Serialize` value as plain data.
#[derive(Debug, Clone, PartialEq)]
pub struct Json<T>(pub T);

impl<T: Serialize> ToWeaveValue for Json<T> {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::from_serialize(&self.0)
    }
}

impl ToWeaveValue for WeaveValue {
    fn to_weave_value(&self) -> WeaveValue {
        self.clone()
    }
}

impl ToWeaveValue for Value {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::from(self.clone())
    }
}

impl ToWeaveValue for () {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Null
    }
}

impl ToWeaveValue for bool {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Bool(*self)
    }
}

macro_rules! int_to_weave_value {
    ($($t:ty),*) => {
        $(
            impl ToWeaveValue for $t {
                fn to_weave_value(&self) -> WeaveValue {
                    WeaveValue::Number(Number::from(*self))
                }
            }
        )*
    };
}

int_to_weave_value!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl ToWeaveValue for f32 {
    fn to_weave_value(&self) -> WeaveValue {
        f64::from(*self).to_weave_value()
    }
}

impl ToWeaveValue for f64 {
    fn to_weave_value(&self) -> WeaveValue {
        Number::from_f64(*self)
            .map(WeaveValue::Number)
            .unwrap_or(WeaveValue::Null)
    }
}

impl ToWeaveValue for str {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::String(self.to_string())
    }
}

impl ToWeaveValue for String {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::String(self.clone())
    }
}

impl<T: ToWeaveValue + ?Sized> ToWeaveValue for &T {
    fn to_weave_value(&self) -> WeaveValue {
        (**self).to_weave_value()
    }
}

impl<T: ToWeaveValue + ?Sized> ToWeaveValue for Arc<T> {
    fn to_weave_value(&self) -> WeaveValue {
        (**self).to_weave_value()
    }
}

impl<T: ToWeaveValue + ?Sized> ToWeaveValue for Box<T> {
    fn to_weave_value(&self) -> WeaveValue {
        (**self).to_weave_value()
    }
}

impl<T: ToWeaveValue> ToWeaveValue for Option<T> {
    fn to_weave_value(&self) -> WeaveValue {
        self.as_ref()
            .map(ToWeaveValue::to_weave_value)
            .unwrap_or(WeaveValue::Null)
    }
}

impl<T: ToWeaveValue> ToWeaveValue for [T] {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::List(self.iter().map(ToWeaveValue::to_weave_value).collect())
    }
}

impl<T: ToWeaveValue> ToWeaveValue for Vec<T> {
    fn to_weave_value(&self) -> WeaveValue {
        self.as_slice().to_weave_value()
    }
}

impl<T: ToWeaveValue> ToWeaveValue for BTreeMap<String, T> {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_weave_value()))
                .collect(),
        )
    }
}

impl<T: ToWeaveValue> ToWeaveValue for HashMap<String, T> {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Map(
            self.iter()
                .map(|(k, v)| (k.clone(), v.to_weave_value()))
                .collect(),
        )
    }
}

impl ToWeaveValue for Reference {
    fn to_weave_value(&self) -> WeaveValue {
        WeaveValue::Ref(self.clone())
    }
}

/// Argument tuples accepted by ops.
///
/// Each element becomes one positional input. Implemented for `()` and
/// tuples of up to eight [`ToWeaveValue`] elements; pass a single argument
/// as a one-element tuple `(x,)`.
pub trait OpArgs {
    fn to_arg_values(&self) -> Vec<WeaveValue>;
}

impl OpArgs for () {
    fn to_arg_values(&self) -> Vec<WeaveValue> {
        Vec::new()
    }
}

macro_rules! tuple_op_args {
    ($($name:ident),+) => {
        impl<$($name: ToWeaveValue),+> OpArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn to_arg_values(&self) -> Vec<WeaveValue> {
                let ($($name,)+) = self;
                vec![$($name.to_weave_value()),+]
            }
        }
    };
}

tuple_op_args!(A);
tuple_op_args!(A, B);
tuple_op_args!(A, B, C);
tuple_op_args!(A, B, C, D);
tuple_op_args!(A, B, C, D, E);
tuple_op_args!(A, B, C, D, E, F);
tuple_op_args!(A, B, C, D, E, F, G);
tuple_op_args!(A, B, C, D, E, F, G, H);

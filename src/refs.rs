// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! References to persisted entities.
//!
//! Every reference renders as a `weave:///` URI:
//!
//! - `weave:///{project}/object/{id}:{digest}[/{extra}...]`
//! - `weave:///{project}/op/{id}:{digest}`
//! - `weave:///{project}/table/{digest}`
//! - `weave:///{project}/table/{digest}/id/{row_digest}`
//!
//! `{project}` is the `entity/project` project id.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::WeaveError;

/// URI scheme prefix for references.
pub const WEAVE_SCHEME: &str = "weave:///";

/// Whether an object reference points at a plain object or an op.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    Object,
    Op,
}

impl ObjectKind {
    fn segment(&self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Op => "op",
        }
    }
}

/// Reference to a versioned object (or op) by id and digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectRef {
    pub project_id: String,
    pub object_id: String,
    pub digest: String,
    pub kind: ObjectKind,
    /// Path into the object, as alternating edge/key segments.
    pub extra: Vec<String>,
}

impl ObjectRef {
    pub fn new(
        project_id: impl Into<String>,
        object_id: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            object_id: object_id.into(),
            digest: digest.into(),
            kind: ObjectKind::Object,
            extra: Vec::new(),
        }
    }

    pub fn op(
        project_id: impl Into<String>,
        object_id: impl Into<String>,
        digest: impl Into<String>,
    ) -> Self {
        Self {
            kind: ObjectKind::Op,
            ..Self::new(project_id, object_id, digest)
        }
    }

    /// Extend the path with extra segments.
    pub fn with_extra<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra.extend(extra.into_iter().map(Into::into));
        self
    }

    pub fn uri(&self) -> String {
        let mut uri = format!(
            "{}{}/{}/{}:{}",
            WEAVE_SCHEME,
            self.project_id,
            self.kind.segment(),
            self.object_id,
            self.digest
        );
        for segment in &self.extra {
            uri.push('/');
            uri.push_str(segment);
        }
        uri
    }
}

/// Reference to a table by content digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRef {
    pub project_id: String,
    pub digest: String,
}

impl TableRef {
    pub fn new(project_id: impl Into<String>, digest: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            digest: digest.into(),
        }
    }

    pub fn uri(&self) -> String {
        format!("{}{}/table/{}", WEAVE_SCHEME, self.project_id, self.digest)
    }

    /// Derive the reference of one row from its digest.
    pub fn row(&self, row_digest: impl Into<String>) -> TableRowRef {
        TableRowRef {
            table: self.clone(),
            row_digest: row_digest.into(),
        }
    }
}

/// Reference to a single row of a table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TableRowRef {
    pub table: TableRef,
    pub row_digest: String,
}

impl TableRowRef {
    pub fn uri(&self) -> String {
        format!("{}/id/{}", self.table.uri(), self.row_digest)
    }
}

/// Any reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    Object(ObjectRef),
    Table(TableRef),
    TableRow(TableRowRef),
}

impl Reference {
    pub fn uri(&self) -> String {
        match self {
            Self::Object(r) => r.uri(),
            Self::Table(r) => r.uri(),
            Self::TableRow(r) => r.uri(),
        }
    }

    pub fn project_id(&self) -> &str {
        match self {
            Self::Object(r) => &r.project_id,
            Self::Table(r) => &r.project_id,
            Self::TableRow(r) => &r.table.project_id,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_table(&self) -> Option<&TableRef> {
        match self {
            Self::Table(r) => Some(r),
            _ => None,
        }
    }

    /// Whether a string looks like a reference URI.
    pub fn is_uri(s: &str) -> bool {
        s.starts_with(WEAVE_SCHEME)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.uri())
    }
}

impl From<ObjectRef> for Reference {
    fn from(r: ObjectRef) -> Self {
        Self::Object(r)
    }
}

impl From<TableRef> for Reference {
    fn from(r: TableRef) -> Self {
        Self::Table(r)
    }
}

impl From<TableRowRef> for Reference {
    fn from(r: TableRowRef) -> Self {
        Self::TableRow(r)
    }
}

impl FromStr for Reference {
    type Err = WeaveError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || WeaveError::InvalidRef(s.to_string());
        let path = s.strip_prefix(WEAVE_SCHEME).ok_or_else(invalid)?;
        let parts: Vec<&str> = path.split('/').collect();

        // The project id may itself contain a slash, so locate the kind segment.
        let kind_idx = parts
            .iter()
            .enumerate()
            .skip(1)
            .find(|(_, p)| matches!(**p, "object" | "op" | "table"))
            .map(|(i, _)| i)
            .ok_or_else(invalid)?;
        let project_id = parts[..kind_idx].join("/");
        let rest = &parts[kind_idx + 1..];
        if project_id.is_empty() || rest.is_empty() {
            return Err(invalid());
        }

        match parts[kind_idx] {
            "table" => {
                let table = TableRef::new(project_id, rest[0]);
                match rest {
                    [_] => Ok(Self::Table(table)),
                    [_, "id", row] => Ok(Self::TableRow(table.row(*row))),
                    _ => Err(invalid()),
                }
            }
            kind => {
                let (object_id, digest) = rest[0].split_once(':').ok_or_else(invalid)?;
                if object_id.is_empty() || digest.is_empty() {
                    return Err(invalid());
                }
                let kind = if kind == "op" {
                    ObjectKind::Op
                } else {
                    ObjectKind::Object
                };
                Ok(Self::Object(ObjectRef {
                    project_id,
                    object_id: object_id.to_string(),
                    digest: digest.to_string(),
                    kind,
                    extra: rest[1..].iter().map(|s| s.to_string()).collect(),
                }))
            }
        }
    }
}

impl Serialize for Reference {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.uri())
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_ref_uri() {
        let r = ObjectRef::new("acme/proj", "my-dataset", "abc123");
        assert_eq!(r.uri(), "weave:///acme/proj/object/my-dataset:abc123");

        let op = ObjectRef::op("acme/proj", "summarize", "d1");
        assert_eq!(op.uri(), "weave:///acme/proj/op/summarize:d1");
    }

    #[test]
    fn test_table_row_uri() {
        let table = TableRef::new("acme/proj", "t1");
        assert_eq!(table.uri(), "weave:///acme/proj/table/t1");
        assert_eq!(table.row("r9").uri(), "weave:///acme/proj/table/t1/id/r9");
    }

    #[test]
    fn test_parse_round_trip() {
        let refs: Vec<Reference> = vec![
            ObjectRef::new("acme/proj", "ds", "d").into(),
            ObjectRef::op("acme/proj", "f", "d").into(),
            ObjectRef::new("acme/proj", "ds", "d")
                .with_extra(["attr", "rows"])
                .into(),
            TableRef::new("acme/proj", "t").into(),
            TableRef::new("acme/proj", "t").row("r").into(),
        ];
        for r in refs {
            let parsed: Reference = r.uri().parse().unwrap();
            assert_eq!(parsed, r);
        }
    }

    #[test]
    fn test_parse_invalid() {
        assert!("http://acme/proj/object/x:y".parse::<Reference>().is_err());
        assert!("weave:///acme/proj/object/missing-digest".parse::<Reference>().is_err());
        assert!("weave:///acme/proj/blob/x".parse::<Reference>().is_err());
        assert!("weave:///acme/proj/table/t/extra".parse::<Reference>().is_err());
    }

    #[test]
    fn test_serde_as_uri() {
        let r: Reference = TableRef::new("a/b", "t").into();
        let json = serde_json::to_string(&r).unwrap();
        assert_eq!(json, "\"weave:///a/b/table/t\"");
        let back: Reference = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }
}

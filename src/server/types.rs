// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Request and response shapes of the trace server API.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::summary::Summary;

/// Start record of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StartedCallSchemaForInsert {
    pub project_id: String,
    pub id: String,
    pub op_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub trace_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

/// End record of a call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EndedCallSchemaForInsert {
    pub project_id: String,
    pub id: String,
    pub ended_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub summary: Summary,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallStartReq {
    pub start: StartedCallSchemaForInsert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallEndReq {
    pub end: EndedCallSchemaForInsert,
}

/// One queued call record: `{"mode": "start"|"end", "req": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", content = "req", rename_all = "lowercase")]
pub enum CallBatchItem {
    Start(CallStartReq),
    End(CallEndReq),
}

impl CallBatchItem {
    pub fn call_id(&self) -> &str {
        match self {
            Self::Start(req) => &req.start.id,
            Self::End(req) => &req.end.id,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, Self::Start(_))
    }

    /// Size of the item as sent on the wire, in bytes.
    pub fn serialized_size(&self) -> usize {
        serde_json::to_vec(self).map(|v| v.len()).unwrap_or(usize::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallCreateBatchReq {
    pub batch: Vec<CallBatchItem>,
}

/// Filter for call queries. Unset fields do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallsFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op_names: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_roots_only: Option<bool>,
}

impl CallsFilter {
    pub fn call_ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            call_ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn trace_ids(ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            trace_ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    pub fn op_names(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            op_names: Some(names.into_iter().map(Into::into).collect()),
            ..Default::default()
        }
    }

    /// Whether a call satisfies every set constraint.
    pub fn matches(&self, call: &CallSchema) -> bool {
        fn allows(list: &Option<Vec<String>>, value: &str) -> bool {
            list.as_ref().map_or(true, |l| l.iter().any(|v| v == value))
        }

        allows(&self.op_names, &call.op_name)
            && allows(&self.call_ids, &call.id)
            && allows(&self.trace_ids, &call.trace_id)
            && self.parent_ids.as_ref().map_or(true, |ids| {
                call.parent_id
                    .as_ref()
                    .is_some_and(|p| ids.iter().any(|id| id == p))
            })
            && (!self.trace_roots_only.unwrap_or(false) || call.parent_id.is_none())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallsQueryReq {
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<CallsFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_costs: Option<bool>,
}

/// Lifecycle state of a call record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallState {
    Pending,
    Finished,
    Failed,
}

/// A call as returned by queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSchema {
    pub id: String,
    pub project_id: String,
    pub op_name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    pub trace_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub exception: Option<String>,
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub inputs: Map<String, Value>,
    #[serde(default)]
    pub output: Option<Value>,
    #[serde(default)]
    pub summary: Option<Summary>,
}

impl CallSchema {
    pub fn state(&self) -> CallState {
        match (&self.ended_at, &self.exception) {
            (None, _) => CallState::Pending,
            (Some(_), Some(_)) => CallState::Failed,
            (Some(_), None) => CallState::Finished,
        }
    }

    /// Build the queryable record from a start record.
    pub fn from_start(start: &StartedCallSchemaForInsert) -> Self {
        Self {
            id: start.id.clone(),
            project_id: start.project_id.clone(),
            op_name: start.op_name.clone(),
            display_name: start.display_name.clone(),
            trace_id: start.trace_id.clone(),
            parent_id: start.parent_id.clone(),
            started_at: start.started_at,
            ended_at: None,
            exception: None,
            attributes: start.attributes.clone(),
            inputs: start.inputs.clone(),
            output: None,
            summary: None,
        }
    }

    /// Apply an end record.
    pub fn apply_end(&mut self, end: &EndedCallSchemaForInsert) {
        self.ended_at = Some(end.ended_at);
        self.exception = end.exception.clone();
        self.output = match end.exception {
            Some(_) => None,
            None => Some(end.output.clone()),
        };
        self.summary = Some(end.summary.clone());
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallUpdateReq {
    pub project_id: String,
    pub call_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjSchemaForInsert {
    pub project_id: String,
    pub object_id: String,
    pub val: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjCreateReq {
    pub obj: ObjSchemaForInsert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjCreateRes {
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjReadReq {
    pub project_id: String,
    pub object_id: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjSchema {
    pub project_id: String,
    pub object_id: String,
    pub digest: String,
    pub val: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjReadRes {
    pub obj: ObjSchema,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchemaForInsert {
    pub project_id: String,
    pub rows: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCreateReq {
    pub table: TableSchemaForInsert,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCreateRes {
    pub digest: String,
    #[serde(default)]
    pub row_digests: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQueryReq {
    pub project_id: String,
    pub digest: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRowSchema {
    pub digest: String,
    pub val: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableQueryRes {
    pub rows: Vec<TableRowSchema>,
}

/// Binary upload; sent as multipart on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct FileCreateReq {
    pub project_id: String,
    pub name: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileCreateRes {
    pub digest: String,
}

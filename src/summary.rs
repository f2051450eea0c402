// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Summary roll-up for calls.
//!
//! A summary maps metric names to numbers, nested summaries, or opaque values.
//! Merging adds numeric leaves, recurses into nested maps, and lets the left
//! side win everything else.

use serde_json::{Map, Number, Value};

/// Metrics rolled up from a call and its descendants.
pub type Summary = Map<String, Value>;

/// Key under which per-model usage is reported.
pub const USAGE_KEY: &str = "usage";

/// Counter implicitly added to every per-model usage entry.
pub const REQUESTS_KEY: &str = "requests";

/// Deep-merge two summaries.
///
/// The result starts as a copy of `right`. For each key in `left`: absent keys
/// are copied, numbers are added, maps are merged recursively, and anything
/// else is overwritten by the left value.
pub fn merge_summaries(left: &Summary, right: &Summary) -> Summary {
    let mut result = right.clone();
    for (key, left_value) in left {
        let merged = match result.get(key) {
            None => left_value.clone(),
            Some(right_value) => merge_values(left_value, right_value),
        };
        result.insert(key.clone(), merged);
    }
    result
}

fn merge_values(left: &Value, right: &Value) -> Value {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => Value::Number(add_numbers(l, r)),
        (Value::Object(l), Value::Object(r)) => Value::Object(merge_summaries(l, r)),
        _ => left.clone(),
    }
}

fn add_numbers(left: &Number, right: &Number) -> Number {
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        if let Some(sum) = l.checked_add(r) {
            return Number::from(sum);
        }
    }
    if let (Some(l), Some(r)) = (left.as_u64(), right.as_u64()) {
        if let Some(sum) = l.checked_add(r) {
            return Number::from(sum);
        }
    }
    let sum = left.as_f64().unwrap_or(0.0) + right.as_f64().unwrap_or(0.0);
    Number::from_f64(sum).unwrap_or_else(|| Number::from(0))
}

/// Give every per-model usage entry a `requests: 1` counter.
///
/// Applied once to a call's own summary before it is merged anywhere, so
/// repeated calls to one model accumulate a request count.
pub fn add_request_counts(summary: &mut Summary) {
    let Some(Value::Object(usage)) = summary.get_mut(USAGE_KEY) else {
        return;
    };
    for entry in usage.values_mut() {
        if let Value::Object(model_usage) = entry {
            model_usage
                .entry(REQUESTS_KEY.to_string())
                .or_insert_with(|| Value::from(1));
        }
    }
}

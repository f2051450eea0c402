// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Querying and updating recorded calls.

use futures_util::TryStreamExt;
use tracing::debug;

use super::WeaveClient;
use crate::error::{TraceServerError, WeaveError};
use crate::server::{CallSchema, CallStream, CallUpdateReq, CallsFilter, CallsQueryReq};

/// A calls query: filter plus paging options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CallsQuery {
    pub filter: CallsFilter,
    pub limit: Option<u64>,
    pub include_costs: bool,
}

impl CallsQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_filter(mut self, filter: CallsFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_costs(mut self, include_costs: bool) -> Self {
        self.include_costs = include_costs;
        self
    }
}

impl From<CallsFilter> for CallsQuery {
    fn from(filter: CallsFilter) -> Self {
        Self::new().with_filter(filter)
    }
}

impl WeaveClient {
    /// Stream calls matching `query` as the server produces them.
    pub async fn calls_stream(&self, query: impl Into<CallsQuery>) -> Result<CallStream, WeaveError> {
        let query = query.into();
        let req = CallsQueryReq {
            project_id: self.project_id().to_string(),
            filter: Some(query.filter),
            limit: query.limit,
            include_costs: query.include_costs.then_some(true),
        };
        Ok(self.server().calls_query_stream(req).await?)
    }

    /// Collect all calls matching `query`.
    ///
    /// Calls whose records are still queued locally are not included; call
    /// [`WeaveClient::wait_for_batch_processing`] first to see them.
    pub async fn get_calls(&self, query: impl Into<CallsQuery>) -> Result<Vec<CallSchema>, WeaveError> {
        let calls: Vec<CallSchema> = self.calls_stream(query).await?.try_collect().await?;
        debug!(count = calls.len(), "Calls fetched");
        Ok(calls)
    }

    pub async fn get_call(&self, call_id: &str) -> Result<CallSchema, WeaveError> {
        let query = CallsQuery::from(CallsFilter::call_ids([call_id])).with_limit(1);
        self.get_calls(query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| WeaveError::CallNotFound(call_id.to_string()))
    }

    /// Change the display name of a recorded call.
    ///
    /// Queued records are delivered first so a call started moments ago exists
    /// on the server.
    pub async fn update_call_display_name(
        &self,
        call_id: &str,
        display_name: impl Into<String>,
    ) -> Result<(), WeaveError> {
        self.wait_for_batch_processing().await;
        self.server()
            .call_update(CallUpdateReq {
                project_id: self.project_id().to_string(),
                call_id: call_id.to_string(),
                display_name: Some(display_name.into()),
            })
            .await
            .map_err(|e| match e {
                TraceServerError::NotFound(_) => WeaveError::CallNotFound(call_id.to_string()),
                other => WeaveError::TraceServer(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BatchConfig;
    use crate::context::CallStack;
    use crate::server::InMemoryTraceServer;
    use crate::summary::Summary;
    use crate::value::OpDef;
    use crate::client::CallOutcome;
    use crate::value::WeaveValue;
    use serde_json::Map;
    use std::sync::Arc;

    async fn record_call(client: &WeaveClient, op: &OpDef) -> String {
        let pushed = CallStack::new().push_new_call();
        let started = client.create_call(op, &pushed, Vec::new(), None, Map::new());
        client.finish_call(
            started,
            &pushed.current_call,
            None,
            CallOutcome::Output(WeaveValue::Null),
            Summary::new(),
        );
        pushed.current_call.call_id.clone()
    }

    fn client() -> WeaveClient {
        let server = Arc::new(InMemoryTraceServer::new());
        WeaveClient::with_batch_config(server, "acme/chat", BatchConfig::testing())
    }

    #[tokio::test]
    async fn test_get_calls_with_limit() {
        let client = client();
        let op = OpDef::new("step", "tests::step");
        for _ in 0..3 {
            record_call(&client, &op).await;
        }
        client.wait_for_batch_processing().await;

        assert_eq!(client.get_calls(CallsQuery::new()).await.unwrap().len(), 3);
        assert_eq!(
            client.get_calls(CallsQuery::new().with_limit(2)).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_get_calls_with_filter() {
        let client = client();
        let op = OpDef::new("step", "tests::step");
        let first = record_call(&client, &op).await;
        record_call(&client, &op).await;
        client.wait_for_batch_processing().await;

        let calls = client
            .get_calls(CallsFilter::call_ids([first.clone()]))
            .await
            .unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, first);

        let mut stream = client
            .calls_stream(CallsQuery::new().with_filter(CallsFilter {
                trace_roots_only: Some(true),
                ..Default::default()
            }))
            .await
            .unwrap();
        let mut count = 0;
        while let Some(call) = stream.try_next().await.unwrap() {
            assert!(call.parent_id.is_none());
            count += 1;
        }
        assert_eq!(count, 2);
    }

    #[tokio::test]
    async fn test_get_call_by_id() {
        let client = client();
        let op = OpDef::new("step", "tests::step");
        let id = record_call(&client, &op).await;
        client.wait_for_batch_processing().await;

        assert_eq!(client.get_call(&id).await.unwrap().id, id);
        let err = client.get_call("missing").await.unwrap_err();
        assert!(matches!(err, WeaveError::CallNotFound(_)));
    }

    #[tokio::test]
    async fn test_update_display_name() {
        let client = client();
        let op = OpDef::new("step", "tests::step");
        let id = record_call(&client, &op).await;

        client.update_call_display_name(&id, "renamed").await.unwrap();
        let call = client.get_call(&id).await.unwrap();
        assert_eq!(call.display_name.as_deref(), Some("renamed"));

        let err = client
            .update_call_display_name("missing", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, WeaveError::CallNotFound(_)));
    }

    #[test]
    fn test_query_from_filter() {
        let query = CallsQuery::from(CallsFilter::op_names(["a"])).with_costs(true);
        assert_eq!(query.filter, CallsFilter::op_names(["a"]));
        assert!(query.include_costs);
        assert_eq!(query.limit, None);
    }
}

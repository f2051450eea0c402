// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! HTTP trace server client.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::ndjson::decode_ndjson;
use super::types::*;
use super::{CallStream, TraceServer};
use crate::error::TraceServerError;

/// Default hosted trace server.
pub const DEFAULT_TRACE_SERVER_URL: &str = "https://trace.wandb.ai";

/// Default per-request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Trace server reached over HTTP.
///
/// Requests authenticate with basic auth, user `api` and the API key as
/// password. Call queries are streamed as NDJSON.
#[derive(Debug, Clone)]
pub struct HttpTraceServer {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    #[serde(alias = "detail", alias = "message")]
    reason: String,
}

impl HttpTraceServer {
    /// Create a client for `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        timeout: Option<Duration>,
    ) -> Result<Self, TraceServerError> {
        let client = Client::builder()
            .timeout(timeout.unwrap_or(Duration::from_secs(DEFAULT_TIMEOUT_SECS)))
            .build()?;

        let base_url = base_url.into().trim_end_matches('/').to_string();
        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn post(&self, path: &str) -> RequestBuilder {
        let request = self.client.post(format!("{}{}", self.base_url, path));
        match &self.api_key {
            Some(key) => request.basic_auth("api", Some(key)),
            None => request,
        }
    }

    async fn send(&self, path: &str, request: RequestBuilder) -> Result<Response, TraceServerError> {
        debug!(path, "Trace server request");
        let response = request.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::error_from_response(status.as_u16(), &body))
    }

    async fn post_json<Req, Res>(&self, path: &str, body: &Req) -> Result<Res, TraceServerError>
    where
        Req: Serialize + ?Sized,
        Res: DeserializeOwned,
    {
        let response = self.send(path, self.post(path).json(body)).await?;
        response
            .json()
            .await
            .map_err(|e| TraceServerError::Parse(e.to_string()))
    }

    fn error_from_response(status: u16, body: &str) -> TraceServerError {
        let message = serde_json::from_str::<ApiErrorBody>(body)
            .map(|e| e.reason)
            .unwrap_or_else(|_| body.to_string());
        if status == 404 {
            TraceServerError::NotFound(message)
        } else {
            TraceServerError::api(status, message)
        }
    }
}

#[async_trait]
impl TraceServer for HttpTraceServer {
    async fn call_upsert_batch(&self, req: CallCreateBatchReq) -> Result<(), TraceServerError> {
        let path = "/call/upsert_batch";
        self.send(path, self.post(path).json(&req)).await?;
        Ok(())
    }

    async fn calls_query_stream(&self, req: CallsQueryReq) -> Result<CallStream, TraceServerError> {
        let path = "/calls/stream_query";
        let request = self
            .post(path)
            .header("accept", "application/jsonl")
            .json(&req);
        let response = self.send(path, request).await?;
        Ok(decode_ndjson(response.bytes_stream()))
    }

    async fn call_update(&self, req: CallUpdateReq) -> Result<(), TraceServerError> {
        let path = "/call/update";
        self.send(path, self.post(path).json(&req)).await?;
        Ok(())
    }

    async fn obj_create(&self, req: ObjCreateReq) -> Result<ObjCreateRes, TraceServerError> {
        self.post_json("/obj/create", &req).await
    }

    async fn obj_read(&self, req: ObjReadReq) -> Result<ObjReadRes, TraceServerError> {
        self.post_json("/obj/read", &req).await
    }

    async fn table_create(&self, req: TableCreateReq) -> Result<TableCreateRes, TraceServerError> {
        self.post_json("/table/create", &req).await
    }

    async fn table_query(&self, req: TableQueryReq) -> Result<TableQueryRes, TraceServerError> {
        self.post_json("/table/query", &req).await
    }

    async fn file_create(&self, req: FileCreateReq) -> Result<FileCreateRes, TraceServerError> {
        let path = "/file/create";
        let part = Part::bytes(req.content).file_name(req.name);
        let form = Form::new()
            .text("project_id", req.project_id)
            .part("file", part);
        let response = self.send(path, self.post(path).multipart(form)).await?;
        response
            .json()
            .await
            .map_err(|e| TraceServerError::Parse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trimmed() {
        let server = HttpTraceServer::new("https://trace.example.com/", None, None).unwrap();
        assert_eq!(server.base_url(), "https://trace.example.com");
    }

    #[test]
    fn test_error_from_json_body() {
        let err = HttpTraceServer::error_from_response(400, r#"{"detail": "bad project"}"#);
        assert_eq!(err, TraceServerError::api(400, "bad project"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_error_from_plain_body() {
        let err = HttpTraceServer::error_from_response(503, "unavailable");
        assert_eq!(err, TraceServerError::api(503, "unavailable"));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_not_found() {
        let err = HttpTraceServer::error_from_response(404, r#"{"message": "no such object"}"#);
        assert_eq!(err, TraceServerError::NotFound("no such object".to_string()));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_network_error() {
        let server = HttpTraceServer::new(
            "http://127.0.0.1:9",
            Some("key".to_string()),
            Some(Duration::from_millis(500)),
        )
        .unwrap();
        let err = server
            .call_update(CallUpdateReq {
                project_id: "e/p".to_string(),
                call_id: "c".to_string(),
                display_name: Some("x".to_string()),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, TraceServerError::Network(_)));
    }
}

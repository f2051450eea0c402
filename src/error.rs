// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Error types for the Weave tracing client.
//!
//! This module provides strongly-typed errors for different parts of the client,
//! using `thiserror` for ergonomic error definitions and `anyhow` for error propagation
//! in application glue code.

use thiserror::Error;

/// Errors returned by a trace server implementation.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TraceServerError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Response parsing error: {0}")]
    Parse(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl TraceServerError {
    /// Create an API error with status code.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Check if a retry could succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(_) => true,
            Self::Api { status, .. } => *status == 429 || *status >= 500,
            Self::Parse(_) | Self::NotFound(_) => false,
        }
    }
}

impl From<reqwest::Error> for TraceServerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Parse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

/// Errors raised by the client itself.
///
/// Cloneable so one pending save result can be observed by every holder of
/// the same forward reference.
#[derive(Error, Debug, Clone)]
pub enum WeaveError {
    #[error("Weave client not initialized; call weave::init first")]
    NotInitialized,

    #[error("{kind} must be saved before it can be serialized")]
    NotSaved { kind: &'static str },

    #[error("Invalid object name: {0}")]
    InvalidObjectName(String),

    #[error("Call not found: {0}")]
    CallNotFound(String),

    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidRef(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Trace server error: {0}")]
    TraceServer(#[from] TraceServerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl WeaveError {
    /// Whether this error signals caller code broke the save-then-serialize protocol.
    pub fn is_programming_fault(&self) -> bool {
        matches!(
            self,
            Self::NotSaved { .. } | Self::InvalidObjectName(_) | Self::InvalidRef(_)
        )
    }
}

impl From<serde_json::Error> for WeaveError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Errors that can occur during configuration loading.
#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),

    #[error("Invalid config format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("IO error reading config: {0}")]
    IoError(String),

    #[error("YAML parsing error: {0}")]
    YamlError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(String),
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => Self::NotFound(err.to_string()),
            _ => Self::IoError(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        Self::JsonError(err.to_string())
    }
}

impl From<serde_yaml::Error> for ConfigError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::YamlError(err.to_string())
    }
}

/// Result type alias using anyhow for flexible error handling.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_server_error_retryable() {
        assert!(TraceServerError::Network("reset".to_string()).is_retryable());
        assert!(TraceServerError::api(503, "unavailable").is_retryable());
        assert!(TraceServerError::api(429, "slow down").is_retryable());
        assert!(!TraceServerError::api(400, "bad request").is_retryable());
        assert!(!TraceServerError::Parse("eof".to_string()).is_retryable());
    }

    #[test]
    fn test_programming_faults() {
        assert!(WeaveError::NotSaved { kind: "Table" }.is_programming_fault());
        assert!(WeaveError::InvalidObjectName("".to_string()).is_programming_fault());
        assert!(!WeaveError::NotInitialized.is_programming_fault());
        assert!(!WeaveError::from(TraceServerError::api(500, "x")).is_programming_fault());
    }

    #[test]
    fn test_config_error_from_json() {
        let result: std::result::Result<serde_json::Value, _> = serde_json::from_str("invalid json");
        let config_err: ConfigError = result.unwrap_err().into();
        assert!(matches!(config_err, ConfigError::JsonError(_)));
    }

    #[test]
    fn test_config_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let config_err: ConfigError = io_err.into();
        assert!(matches!(config_err, ConfigError::NotFound(_)));
    }

    #[test]
    fn test_error_display() {
        let err = WeaveError::NotSaved { kind: "Table" };
        assert_eq!(err.to_string(), "Table must be saved before it can be serialized");

        let err = TraceServerError::api(502, "bad gateway");
        let display = format!("{}", err);
        assert!(display.contains("502"));
        assert!(display.contains("bad gateway"));
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration merging.
//!
//! Handles merging configurations from different sources with proper precedence.

use crate::error::ConfigError;

use super::types::{BatchConfig, WeaveConfig, WeaveSettings};

/// Options passed explicitly by the application; highest precedence.
#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub project: Option<String>,
    pub trace_server_url: Option<String>,
    pub api_key: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub batch: Option<BatchConfig>,
}

impl InitOptions {
    pub fn project(project: impl Into<String>) -> Self {
        Self {
            project: Some(project.into()),
            ..Default::default()
        }
    }
}

/// Default configuration values.
pub fn default_settings() -> WeaveSettings {
    WeaveSettings::default()
}

/// Merge configuration sources with precedence.
///
/// Precedence (highest to lowest):
/// 1. Explicit options
/// 2. Environment
/// 3. Local config (.weave.local.json)
/// 4. Workspace config (.weave.json)
/// 5. Global config (~/.weave/config.json)
/// 6. Default values
pub fn merge_config(
    global: Option<WeaveConfig>,
    workspace: Option<WeaveConfig>,
    local: Option<WeaveConfig>,
    env: Option<WeaveConfig>,
    options: InitOptions,
) -> WeaveSettings {
    let mut result = default_settings();

    for config in [global, workspace, local, env].into_iter().flatten() {
        apply_config(&mut result, &config);
    }

    apply_options(&mut result, options);

    result
}

fn apply_config(result: &mut WeaveSettings, config: &WeaveConfig) {
    if config.project.is_some() {
        result.project_id = config.project.clone();
    }

    if let Some(ref url) = config.trace_server_url {
        result.trace_server_url = url.clone();
    }

    if config.api_key.is_some() {
        result.api_key = config.api_key.clone();
    }

    if let Some(timeout) = config.request_timeout_ms {
        result.request_timeout_ms = timeout;
    }

    if let Some(ref batch) = config.batch {
        result.batch.apply(batch);
    }
}

fn apply_options(result: &mut WeaveSettings, options: InitOptions) {
    if options.project.is_some() {
        result.project_id = options.project;
    }

    if let Some(url) = options.trace_server_url {
        result.trace_server_url = url;
    }

    if options.api_key.is_some() {
        result.api_key = options.api_key;
    }

    if let Some(timeout) = options.request_timeout_ms {
        result.request_timeout_ms = timeout;
    }

    if let Some(batch) = options.batch {
        result.batch = batch;
    }
}

/// Check that a project id has the `entity/project` form.
pub fn validate_project_id(project_id: &str) -> Result<(), ConfigError> {
    let mut parts = project_id.split('/');
    let valid = matches!(
        (parts.next(), parts.next(), parts.next()),
        (Some(entity), Some(project), None) if !entity.trim().is_empty() && !project.trim().is_empty()
    );

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidValue {
            field: "project".to_string(),
            message: format!("expected 'entity/project', got '{}'", project_id),
        })
    }
}

// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration module.
//!
//! Handles loading and merging of configuration from multiple sources:
//! - Global config: ~/.weave/config.json
//! - Workspace config: .weave.json, .weave/config.json, or weave.config.json
//! - Local config: .weave.local.json (gitignored, for personal overrides)
//! - Environment: WEAVE_PROJECT, WF_TRACE_SERVER_URL, WANDB_API_KEY, WEAVE_BATCH_*
//! - Explicit options passed to `weave::init`
//!
//! Configuration is merged with precedence (explicit > env > local > workspace > global > defaults).

mod loader;
mod merger;
mod types;

pub use loader::{
    env_config_from, find_workspace_root, get_global_config_dir, get_global_config_path,
    load_config_file, load_env_config, load_global_config, load_local_config,
    load_workspace_config, save_workspace_config, CONFIG_FILES, ENV_API_KEY,
    ENV_BATCH_INTERVAL_MS, ENV_BATCH_SIZE_LIMIT, ENV_ERROR_LOG, ENV_FATAL_POLICY,
    ENV_MAX_BATCH_ERRORS, ENV_PROJECT, ENV_TRACE_SERVER_URL, GLOBAL_CONFIG_DIR,
    GLOBAL_CONFIG_FILE, LOCAL_CONFIG_FILE,
};

pub use merger::{default_settings, merge_config, validate_project_id, InitOptions};

pub use types::{
    BatchConfig, BatchConfigPartial, FatalPolicy, WeaveConfig, WeaveSettings,
    DEFAULT_BATCH_INTERVAL_MS, DEFAULT_BATCH_SIZE_LIMIT, DEFAULT_ERROR_LOG,
    DEFAULT_MAX_BATCH_ERRORS, DEFAULT_REQUEST_TIMEOUT_MS, DEFAULT_TRACE_SERVER_URL,
};

use crate::error::ConfigError;
use std::path::Path;

/// Load and merge all configuration sources for a workspace.
///
/// The project id must be set by some source and have the
/// `entity/project` form.
pub fn load_settings(
    workspace_root: &Path,
    options: InitOptions,
) -> Result<WeaveSettings, ConfigError> {
    let global = load_global_config()?;
    let workspace = load_workspace_config(workspace_root)?;
    let local = load_local_config(workspace_root)?;
    let env = load_env_config()?;

    let settings = merge_config(global, workspace, local, env, options);
    match settings.project_id.as_deref() {
        Some(project_id) => validate_project_id(project_id)?,
        None => return Err(ConfigError::MissingField("project".to_string())),
    }
    Ok(settings)
}

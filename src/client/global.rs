// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Process-wide current client.
//!
//! Ops without an explicitly bound client record through the client
//! installed here by [`init`] or [`set_global_client`].

use std::sync::RwLock;

use once_cell::sync::Lazy;
use tracing::info;

use super::WeaveClient;
use crate::config::{load_settings, InitOptions};
use crate::error::WeaveError;

static GLOBAL_CLIENT: Lazy<RwLock<Option<WeaveClient>>> = Lazy::new(|| RwLock::new(None));

/// Initialize tracing for `project` ("entity/project") and install the client globally.
///
/// Settings are merged from config files and the environment of the current
/// directory; see [`crate::config`].
pub fn init(project: impl Into<String>) -> Result<WeaveClient, WeaveError> {
    init_with(InitOptions::project(project))
}

/// Like [`init`], with every setting explicit.
pub fn init_with(options: InitOptions) -> Result<WeaveClient, WeaveError> {
    let cwd = std::env::current_dir()
        .map_err(|e| WeaveError::Internal(format!("cannot read current directory: {}", e)))?;
    let settings = load_settings(&cwd, options)?;
    let client = WeaveClient::from_settings(&settings)?;

    info!(
        project = %client.project_id(),
        server = %settings.trace_server_url,
        "Weave client initialized"
    );
    set_global_client(client.clone());
    Ok(client)
}

/// The installed client, if any.
pub fn current_client() -> Option<WeaveClient> {
    GLOBAL_CLIENT
        .read()
        .map(|guard| guard.clone())
        .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
}

/// The installed client, or [`WeaveError::NotInitialized`].
pub fn require_client() -> Result<WeaveClient, WeaveError> {
    current_client().ok_or(WeaveError::NotInitialized)
}

/// Install `client`, replacing any previous one.
pub fn set_global_client(client: WeaveClient) {
    let mut guard = GLOBAL_CLIENT
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    *guard = Some(client);
}

/// Remove the installed client; ops go back to running untraced.
pub fn clear_global_client() -> Option<WeaveClient> {
    let mut guard = GLOBAL_CLIENT
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.take()
}

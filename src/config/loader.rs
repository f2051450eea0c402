// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Configuration loading from files and the environment.

use std::path::{Path, PathBuf};

use crate::error::ConfigError;

use super::types::{BatchConfigPartial, FatalPolicy, WeaveConfig};

/// Config file names to search for (in order).
pub const CONFIG_FILES: &[&str] = &[".weave.json", ".weave/config.json", "weave.config.json"];

/// Local config file name (for per-directory overrides).
pub const LOCAL_CONFIG_FILE: &str = ".weave.local.json";

/// Global config directory name.
pub const GLOBAL_CONFIG_DIR: &str = ".weave";

/// Global config file name.
pub const GLOBAL_CONFIG_FILE: &str = "config.json";

pub const ENV_PROJECT: &str = "WEAVE_PROJECT";
pub const ENV_TRACE_SERVER_URL: &str = "WF_TRACE_SERVER_URL";
pub const ENV_API_KEY: &str = "WANDB_API_KEY";
pub const ENV_BATCH_INTERVAL_MS: &str = "WEAVE_BATCH_INTERVAL_MS";
pub const ENV_BATCH_SIZE_LIMIT: &str = "WEAVE_BATCH_SIZE_LIMIT";
pub const ENV_MAX_BATCH_ERRORS: &str = "WEAVE_MAX_BATCH_ERRORS";
pub const ENV_ERROR_LOG: &str = "WEAVE_ERROR_LOG";
pub const ENV_FATAL_POLICY: &str = "WEAVE_FATAL_POLICY";

/// Get the global config directory path.
pub fn get_global_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(GLOBAL_CONFIG_DIR))
}

/// Get the global config file path.
pub fn get_global_config_path() -> Option<PathBuf> {
    get_global_config_dir().map(|dir| dir.join(GLOBAL_CONFIG_FILE))
}

/// Load global configuration from ~/.weave/config.json.
pub fn load_global_config() -> Result<Option<WeaveConfig>, ConfigError> {
    let path = match get_global_config_path() {
        Some(p) => p,
        None => return Ok(None),
    };

    if !path.exists() {
        return Ok(None);
    }

    load_config_file(&path).map(Some)
}

/// Load workspace configuration from the first config file found in
/// `workspace_root`, searching [`CONFIG_FILES`] in order.
pub fn load_workspace_config(workspace_root: &Path) -> Result<Option<WeaveConfig>, ConfigError> {
    for filename in CONFIG_FILES {
        let path = workspace_root.join(filename);
        if path.exists() {
            return load_config_file(&path).map(Some);
        }
    }
    Ok(None)
}

/// Load local configuration from .weave.local.json.
pub fn load_local_config(workspace_root: &Path) -> Result<Option<WeaveConfig>, ConfigError> {
    let path = workspace_root.join(LOCAL_CONFIG_FILE);
    if !path.exists() {
        return Ok(None);
    }
    load_config_file(&path).map(Some)
}

/// Load a configuration file (JSON or YAML).
pub fn load_config_file(path: &Path) -> Result<WeaveConfig, ConfigError> {
    let content = std::fs::read_to_string(path)?;

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("");

    match extension.to_lowercase().as_str() {
        "yaml" | "yml" => serde_yaml::from_str(&content).map_err(ConfigError::from),
        _ => serde_json::from_str(&content).map_err(ConfigError::from),
    }
}

/// Read configuration from the process environment.
pub fn load_env_config() -> Result<Option<WeaveConfig>, ConfigError> {
    env_config_from(|key| std::env::var(key).ok())
}

/// Build a config from an environment lookup. Empty values count as unset.
pub fn env_config_from<F>(lookup: F) -> Result<Option<WeaveConfig>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

    let batch = BatchConfigPartial {
        interval_ms: parse_env(ENV_BATCH_INTERVAL_MS, get(ENV_BATCH_INTERVAL_MS))?,
        size_limit_bytes: parse_env(ENV_BATCH_SIZE_LIMIT, get(ENV_BATCH_SIZE_LIMIT))?,
        max_consecutive_errors: parse_env(ENV_MAX_BATCH_ERRORS, get(ENV_MAX_BATCH_ERRORS))?,
        fatal_policy: get(ENV_FATAL_POLICY)
            .map(|v| parse_fatal_policy(&v))
            .transpose()?,
        error_log: get(ENV_ERROR_LOG).map(PathBuf::from),
    };

    let config = WeaveConfig {
        project: get(ENV_PROJECT),
        trace_server_url: get(ENV_TRACE_SERVER_URL),
        api_key: get(ENV_API_KEY),
        request_timeout_ms: None,
        batch: (batch != BatchConfigPartial::default()).then_some(batch),
    };

    Ok((config != WeaveConfig::default()).then_some(config))
}

fn parse_env<T: std::str::FromStr>(key: &str, value: Option<String>) -> Result<Option<T>, ConfigError> {
    value
        .map(|v| {
            v.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
                field: key.to_string(),
                message: format!("cannot parse '{}'", v),
            })
        })
        .transpose()
}

fn parse_fatal_policy(value: &str) -> Result<FatalPolicy, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "exit" => Ok(FatalPolicy::Exit),
        "halt" => Ok(FatalPolicy::Halt),
        other => Err(ConfigError::InvalidValue {
            field: ENV_FATAL_POLICY.to_string(),
            message: format!("expected 'exit' or 'halt', got '{}'", other),
        }),
    }
}

/// Save workspace configuration to a file.
pub fn save_workspace_config(
    workspace_root: &Path,
    config: &WeaveConfig,
    filename: Option<&str>,
) -> Result<PathBuf, ConfigError> {
    let filename = filename.unwrap_or(CONFIG_FILES[0]);
    let path = workspace_root.join(filename);

    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, content)?;

    Ok(path)
}

/// Find the workspace root by searching for config files.
///
/// Walks up the directory tree from `start` until it finds a directory
/// containing a config file or reaches the filesystem root.
pub fn find_workspace_root(start: &Path) -> Option<PathBuf> {
    let mut current = start.to_path_buf();

    loop {
        for filename in CONFIG_FILES {
            if current.join(filename).exists() {
                return Some(current);
            }
        }

        match current.parent() {
            Some(parent) => current = parent.to_path_buf(),
            None => return None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_global_config_dir() {
        let dir = get_global_config_dir();
        assert!(dir.is_some());
        assert!(dir.unwrap().ends_with(".weave"));
    }

    #[test]
    fn test_load_workspace_config_not_found() {
        let temp = TempDir::new().unwrap();
        let result = load_workspace_config(temp.path());
        assert!(result.unwrap().is_none());
    }

    #[test]
    fn test_load_workspace_config_json() {
        let temp = TempDir::new().unwrap();
        std::fs::write(
            temp.path().join(".weave.json"),
            r#"{"project": "acme/chat", "requestTimeoutMs": 5000}"#,
        )
        .unwrap();

        let config = load_workspace_config(temp.path()).unwrap().unwrap();
        assert_eq!(config.project, Some("acme/chat".to_string()));
        assert_eq!(config.request_timeout_ms, Some(5000));
    }

    #[test]
    fn test_load_config_file_yaml() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("weave.yaml");
        std::fs::write(&path, "project: acme/chat\nbatch:\n  sizeLimitBytes: 2048\n").unwrap();

        let config = load_config_file(&path).unwrap();
        assert_eq!(config.project, Some("acme/chat".to_string()));
        assert_eq!(config.batch.unwrap().size_limit_bytes, Some(2048));
    }

    #[test]
    fn test_load_config_file_invalid() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join(".weave.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_config_file(&path), Err(ConfigError::JsonError(_))));
    }

    #[test]
    fn test_env_config() {
        let config = env_config_from(env(&[
            (ENV_PROJECT, "acme/chat"),
            (ENV_API_KEY, "secret"),
            (ENV_BATCH_INTERVAL_MS, "250"),
            (ENV_FATAL_POLICY, "Halt"),
        ]))
        .unwrap()
        .unwrap();
        assert_eq!(config.project.as_deref(), Some("acme/chat"));
        assert_eq!(config.api_key.as_deref(), Some("secret"));
        let batch = config.batch.unwrap();
        assert_eq!(batch.interval_ms, Some(250));
        assert_eq!(batch.fatal_policy, Some(FatalPolicy::Halt));
    }

    #[test]
    fn test_env_config_empty() {
        assert!(env_config_from(env(&[(ENV_PROJECT, "  ")])).unwrap().is_none());
    }

    #[test]
    fn test_env_config_invalid_number() {
        let err = env_config_from(env(&[(ENV_BATCH_SIZE_LIMIT, "lots")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_save_and_find_workspace_root() {
        let temp = TempDir::new().unwrap();
        let config = WeaveConfig {
            project: Some("acme/chat".to_string()),
            ..Default::default()
        };
        let path = save_workspace_config(temp.path(), &config, None).unwrap();
        assert_eq!(path.file_name().unwrap(), ".weave.json");

        let subdir = temp.path().join("a").join("b");
        std::fs::create_dir_all(&subdir).unwrap();
        assert_eq!(find_workspace_root(&subdir).unwrap(), temp.path());
    }
}

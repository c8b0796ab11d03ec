//! Application settings and per-user paths.
//!
//! Settings live in `settings.json` under the per-user config directory.
//! A missing or unreadable file means defaults.

use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::error::ReviewError;
use crate::services::agent_runner::AgentConfig;
use crate::services::credentials::CredentialService;
use crate::services::github_client::GitHubConfig;
use crate::services::watch_engine::WatchOptions;

/// Settings file name.
const SETTINGS_FILE: &str = "settings.json";

/// Environment variables checked for a GitHub token, in order.
const TOKEN_ENV_VARS: &[&str] = &["GITHUB_TOKEN", "GH_TOKEN"];

/// Application settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub github: GitHubConfig,

    pub agent: AgentConfig,

    pub watch: WatchOptions,

    /// Comment store directory; the per-user data directory when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_dir: Option<PathBuf>,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("dev", "review-watch", "review-watch")
}

/// Per-user directory for the comment store.
pub fn default_state_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.data_dir().join("state"))
}

/// Per-user settings file.
pub fn settings_path() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().join(SETTINGS_FILE))
}

impl Settings {
    /// Load from the per-user settings file.
    pub async fn load() -> Self {
        match settings_path() {
            Some(path) => Self::load_from(&path).await,
            None => Self::default(),
        }
    }

    /// Load from `path`, falling back to defaults.
    pub async fn load_from(path: &Path) -> Self {
        match tokio::fs::read_to_string(path).await {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                log::warn!("[config] Ignoring invalid settings {}: {}", path.display(), e);
                Self::default()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(e) => {
                log::warn!("[config] Failed to read settings {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Save to the per-user settings file.
    pub async fn save(&self) -> Result<(), ReviewError> {
        let path = settings_path()
            .ok_or_else(|| ReviewError::internal("Could not determine a per-user config directory"))?;
        self.save_to(&path).await
    }

    pub async fn save_to(&self, path: &Path) -> Result<(), ReviewError> {
        let storage_err = |e: std::io::Error| ReviewError::Storage {
            message: format!("Failed to save settings: {}", e),
            path: Some(path.display().to_string()),
        };

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(storage_err)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json).await.map_err(storage_err)
    }

    /// Comment store directory: the override, else the per-user default.
    pub fn state_dir(&self) -> Option<PathBuf> {
        self.state_dir.clone().or_else(default_state_dir)
    }

    /// GitHub configuration with the resolved token filled in.
    pub fn github_config(&self) -> GitHubConfig {
        let mut config = self.github.clone();
        config.token = resolve_token(&config.api_url).unwrap_or_default();
        config
    }
}

/// GitHub token from `GITHUB_TOKEN`, `GH_TOKEN`, then the keychain.
pub fn resolve_token(api_url: &str) -> Option<String> {
    resolve_token_with(
        |name| std::env::var(name).ok(),
        || CredentialService::get_token(api_url),
    )
}

fn resolve_token_with(
    env: impl Fn(&str) -> Option<String>,
    keychain: impl FnOnce() -> Result<String, ReviewError>,
) -> Option<String> {
    let from_env = TOKEN_ENV_VARS
        .iter()
        .filter_map(|name| env(name))
        .map(|token| token.trim().to_string())
        .find(|token| !token.is_empty());
    if from_env.is_some() {
        return from_env;
    }

    match keychain() {
        Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
        Ok(_) => None,
        Err(ReviewError::NotFound { .. }) => None,
        Err(e) => {
            log::warn!("[config] Keychain lookup failed: {}", e);
            None
        }
    }
}

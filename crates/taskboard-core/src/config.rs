//! Application configuration management.
//!
//! Configuration is stored at `~/.config/taskboard/config.json`. Every field
//! has a default, so a missing file or a partial file is fine.
//! `TASKBOARD_API_URL` and `TASKBOARD_CREDENTIAL_BACKEND` override the file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{
    FileTokenPersistence, KeyringTokenPersistence, MemoryTokenPersistence, TokenPersistence,
};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "taskboard";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";
const DEFAULT_LOGGED_OUT_REDIRECT: &str = "/dashboard";

/// HTTP request timeout in seconds.
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Upper bound on how long queued requests wait for a token refresh.
const DEFAULT_REFRESH_TIMEOUT_SECS: u64 = 10;

pub const API_URL_ENV: &str = "TASKBOARD_API_URL";
pub const CREDENTIAL_BACKEND_ENV: &str = "TASKBOARD_CREDENTIAL_BACKEND";

/// Where the credential pair is persisted between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CredentialBackend {
    #[default]
    File,
    Keyring,
    Memory,
}

impl CredentialBackend {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "file" => Some(Self::File),
            "keyring" | "keychain" => Some(Self::Keyring),
            "memory" => Some(Self::Memory),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub logged_out_redirect: String,
    pub request_timeout_secs: u64,
    pub refresh_timeout_secs: u64,
    /// Wipe stored credentials when a refresh fails for network reasons,
    /// not only when the server rejects the refresh token.
    pub wipe_on_transient_refresh_failure: bool,
    pub credential_backend: CredentialBackend,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            logged_out_redirect: DEFAULT_LOGGED_OUT_REDIRECT.to_string(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            refresh_timeout_secs: DEFAULT_REFRESH_TIMEOUT_SECS,
            wipe_on_transient_refresh_failure: true,
            credential_backend: CredentialBackend::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load the config file (or defaults) and apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(API_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(CREDENTIAL_BACKEND_ENV) {
            match CredentialBackend::parse(&raw) {
                Some(backend) => self.credential_backend = backend,
                None => tracing::warn!(value = %raw, "Ignoring unknown credential backend"),
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    /// Parsed API base URL. A trailing slash is added so relative joins keep
    /// any path prefix.
    pub fn base_url(&self) -> Result<url::Url> {
        let mut raw = self.api_base_url.trim().to_string();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        url::Url::parse(&raw).with_context(|| format!("Invalid API base URL: {}", self.api_base_url))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn refresh_timeout(&self) -> Duration {
        Duration::from_secs(self.refresh_timeout_secs)
    }

    /// Build the persistence backend selected by `credential_backend`.
    pub fn token_persistence(&self) -> Result<Arc<dyn TokenPersistence>> {
        Ok(match self.credential_backend {
            CredentialBackend::File => Arc::new(FileTokenPersistence::new(self.cache_dir()?)),
            CredentialBackend::Keyring => Arc::new(KeyringTokenPersistence::new()),
            CredentialBackend::Memory => Arc::new(MemoryTokenPersistence::default()),
        })
    }
}

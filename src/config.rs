//! Configuration system for `shellpilot`.

use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::cache;
use crate::credentials::CredentialStore;

/// How interactively entered keys are kept
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Save a prompted key to the credential store once it validates.
    /// When false the key lives only for the current process.
    pub persist_prompted: bool,
    /// Credential store location override
    pub store_path: Option<PathBuf>,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            persist_prompted: true,
            store_path: None,
        }
    }
}

/// Settings for the remote diagnostic service
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DiagnosisConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for DiagnosisConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.4,
            max_tokens: 500,
            base_url: "https://api.openai.com/v1".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Diagnosis cache settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_hours: u64,
    /// Cache directory override (default: `<temp>/shellpilot-cache`)
    pub dir: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_hours: 24,
            dir: None,
        }
    }
}

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub credentials: CredentialsConfig,
    pub diagnosis: DiagnosisConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load config from file with environment overrides applied
    pub fn load() -> Self {
        let mut config = Self::load_from_path(Self::config_path());
        config.apply_env_overrides();
        config
    }

    /// Load config from a specific path, returning defaults if it is missing or invalid
    pub fn load_from_path(path: Option<PathBuf>) -> Self {
        let Some(path) = path else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match std::fs::read_to_string(&path).map(|c| toml::from_str(&c)) {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                tracing::warn!(path = %path.display(), error = %e, "invalid config, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "unreadable config, using defaults");
                Self::default()
            }
        }
    }

    /// Get the config file path (~/.config/shellpilot/config.toml)
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("shellpilot").join("config.toml"))
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if flag_set("SHELLPILOT_NO_CACHE") {
            self.cache.enabled = false;
        }
        if flag_set("SHELLPILOT_SESSION_ONLY") {
            self.credentials.persist_prompted = false;
        }
        if let Some(dir) = non_empty_var("SHELLPILOT_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(dir));
        }
        if let Some(path) = non_empty_var("SHELLPILOT_STORE_PATH") {
            self.credentials.store_path = Some(PathBuf::from(path));
        }
        if let Some(url) = non_empty_var("SHELLPILOT_BASE_URL") {
            self.diagnosis.base_url = url;
        }
        if let Some(model) = non_empty_var("SHELLPILOT_MODEL") {
            self.diagnosis.model = model;
        }
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(cache::default_cache_dir)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache.ttl_hours.saturating_mul(60 * 60))
    }

    /// Credential store location, if one can be determined
    pub fn store_path(&self) -> Option<PathBuf> {
        self.credentials
            .store_path
            .clone()
            .or_else(CredentialStore::default_path)
    }
}

fn flag_set(name: &str) -> bool {
    env::var(name).map(|v| v == "1").unwrap_or(false)
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

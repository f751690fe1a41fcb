//! Configuration types and loading
//!
//! Precedence: CLI flags > env vars > config file > defaults. A missing
//! config file is only an error when the path was given explicitly; the
//! default path falls back to built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use api_client::ClientConfig;
use property_auth::{API_URL_ENV, DEFAULT_API_BASE_URL};
use serde::Deserialize;

pub const DEFAULT_CONFIG_FILE: &str = "property237.toml";

/// Root configuration
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Backend connection settings
#[derive(Debug, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_refresh_timeout")]
    pub refresh_timeout_secs: u64,
}

/// Where the signed-in session is persisted
#[derive(Debug, Default, Deserialize)]
pub struct SessionConfig {
    /// Defaults to `$HOME/.property237/credentials.json`
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_secs: default_timeout(),
            refresh_timeout_secs: default_refresh_timeout(),
        }
    }
}

fn default_base_url() -> String {
    DEFAULT_API_BASE_URL.to_string()
}

fn default_timeout() -> u64 {
    60
}

fn default_refresh_timeout() -> u64 {
    15
}

impl Config {
    /// Load configuration from `path`, overlay the environment and validate.
    ///
    /// `explicit` marks a path the user asked for; only then is a missing
    /// file an error.
    pub fn load(path: &Path, explicit: bool) -> common::Result<Self> {
        let mut config = if path.exists() || explicit {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str(&contents)?
        } else {
            Config::default()
        };
        config.apply_overrides(std::env::var(API_URL_ENV).ok(), None);
        config.validate()?;
        Ok(config)
    }

    /// Overlay env var and CLI flag values. The CLI flag wins.
    pub fn apply_overrides(&mut self, env_base_url: Option<String>, cli_base_url: Option<String>) {
        if let Some(url) = cli_base_url.or(env_base_url).filter(|u| !u.trim().is_empty()) {
            self.api.base_url = url.trim().to_string();
        }
    }

    pub fn validate(&self) -> common::Result<()> {
        if !self.api.base_url.starts_with("http://") && !self.api.base_url.starts_with("https://")
        {
            return Err(common::Error::Config(format!(
                "base_url must start with http:// or https://, got: {}",
                self.api.base_url
            )));
        }
        if self.api.timeout_secs == 0 {
            return Err(common::Error::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        if self.api.refresh_timeout_secs == 0 {
            return Err(common::Error::Config(
                "refresh_timeout_secs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            base_url: self.api.base_url.clone(),
            timeout: Duration::from_secs(self.api.timeout_secs),
            refresh_timeout: Duration::from_secs(self.api.refresh_timeout_secs),
        }
    }

    pub fn credentials_path(&self) -> PathBuf {
        if let Some(path) = &self.session.credentials_path {
            return path.clone();
        }
        match std::env::var_os("HOME") {
            Some(home) => PathBuf::from(home)
                .join(".property237")
                .join("credentials.json"),
            None => PathBuf::from(".property237-credentials.json"),
        }
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    /// Returns the path and whether it was explicitly requested.
    pub fn resolve_path(cli_path: Option<&Path>) -> (PathBuf, bool) {
        if let Some(p) = cli_path {
            return (p.to_path_buf(), true);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return (PathBuf::from(p), true);
        }
        (PathBuf::from(DEFAULT_CONFIG_FILE), false)
    }
}

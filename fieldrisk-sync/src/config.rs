//! Configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! YAML/TOML/JSON file, then `FIELDRISK__SECTION__KEY` environment variables.

use crate::local_db::LocalDbConfig;
use crate::remote::HttpRemoteConfig;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "FIELDRISK";
const ENV_SEPARATOR: &str = "__";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldRiskConfig {
    pub local: LocalDbConfig,
    pub remote: RemoteConfig,
    pub share: ShareConfig,
}

#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteConfig {
    /// When false the app runs purely local and never probes
    pub enabled: bool,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub probe_timeout_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            probe_timeout_ms: 3_000,
            request_timeout_ms: 10_000,
        }
    }
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("enabled", &self.enabled)
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("probe_timeout_ms", &self.probe_timeout_ms)
            .field("request_timeout_ms", &self.request_timeout_ms)
            .finish()
    }
}

impl RemoteConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// HTTP settings, or `None` when the remote is disabled
    pub fn http(&self) -> Option<HttpRemoteConfig> {
        if !self.enabled {
            return None;
        }
        Some(HttpRemoteConfig {
            base_url: self.base_url.clone()?,
            api_key: self.api_key.clone()?,
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShareConfig {
    pub default_expiry_days: u32,
    pub max_expiry_days: u32,
}

impl Default for ShareConfig {
    fn default() -> Self {
        Self {
            default_expiry_days: 7,
            max_expiry_days: 30,
        }
    }
}

impl FieldRiskConfig {
    /// Defaults overlaid with environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load(None::<&Path>)
    }

    /// Defaults, then `path` if given, then environment variables
    pub fn load(path: Option<impl AsRef<Path>>) -> Result<Self, ConfigError> {
        Self::load_with_env(path, None)
    }

    fn load_with_env(
        path: Option<impl AsRef<Path>>,
        env: Option<HashMap<String, String>>,
    ) -> Result<Self, ConfigError> {
        let mut builder = ::config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(::config::File::from(path.as_ref()).required(true));
        }

        builder = builder.add_source(
            ::config::Environment::with_prefix(ENV_PREFIX)
                .separator(ENV_SEPARATOR)
                .try_parsing(true)
                .source(env),
        );

        let config: FieldRiskConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.local.namespace.trim().is_empty() {
            return Err(ConfigError::Invalid("local.namespace cannot be empty".to_string()));
        }
        if self.local.db_path.trim().is_empty() {
            return Err(ConfigError::Invalid("local.db_path cannot be empty".to_string()));
        }
        if self.local.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "local.max_connections must be at least 1".to_string(),
            ));
        }

        if self.remote.enabled {
            match self.remote.base_url.as_deref() {
                Some(url) if url.starts_with("https://") || url.starts_with("http://") => {}
                Some(url) => {
                    return Err(ConfigError::Invalid(format!(
                        "remote.base_url must be an http(s) URL, got '{url}'"
                    )))
                }
                None => {
                    return Err(ConfigError::Invalid(
                        "remote.base_url is required when the remote is enabled".to_string(),
                    ))
                }
            }
            if self.remote.api_key.as_deref().map_or(true, |k| k.trim().is_empty()) {
                return Err(ConfigError::Invalid(
                    "remote.api_key is required when the remote is enabled".to_string(),
                ));
            }
        }
        if self.remote.probe_timeout_ms == 0 || self.remote.request_timeout_ms == 0 {
            return Err(ConfigError::Invalid("remote timeouts must be positive".to_string()));
        }

        if self.share.max_expiry_days == 0 {
            return Err(ConfigError::Invalid(
                "share.max_expiry_days must be at least 1".to_string(),
            ));
        }
        if !(1..=self.share.max_expiry_days).contains(&self.share.default_expiry_days) {
            return Err(ConfigError::Invalid(format!(
                "share.default_expiry_days must be between 1 and {}",
                self.share.max_expiry_days
            )));
        }

        Ok(())
    }
}

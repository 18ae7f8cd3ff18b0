//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml, merges an optional user file
//! from the platform config directory on top, then applies environment variable
//! overrides.

use std::env;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use tracing::debug;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// User configuration file name.
const USER_CONFIG_FILE: &str = "config.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api: ApiConfig,
    pub session: SessionConfig,
    pub credential: CredentialConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub management_base_url: String,
    pub graph_base_url: String,
    pub api_version_subscriptions: String,
    pub api_version_authorization: String,
    pub connect_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub timeout_seconds: u64,
    pub default_activation_minutes: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CredentialConfig {
    pub authority_host: String,
    pub sources: Vec<CredentialSource>,
    pub imds_endpoint: String,
    pub imds_timeout_seconds: u64,
}

/// Ambient identity sources, tried in the configured order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialSource {
    Environment,
    AzureCli,
    ManagedIdentity,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded defaults, the user file, and environment overrides.
    pub fn load() -> Result<Self> {
        let mut merged: toml::Value =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        if let Some(path) = user_config_path().filter(|p| p.exists()) {
            let content = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let user: toml::Value = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            merge(&mut merged, user);
            debug!("Merged user configuration from {:?}", path);
        }

        let mut config: Config = merged
            .try_into()
            .context("Configuration does not match the expected layout")?;

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(url) = env::var("PIMCTL_MANAGEMENT_URL") {
            self.api.management_base_url = url;
        }

        if let Ok(url) = env::var("PIMCTL_GRAPH_URL") {
            self.api.graph_base_url = url;
        }

        if let Ok(secs) = env::var("PIMCTL_TIMEOUT_SECS") {
            self.session.timeout_seconds = secs
                .parse()
                .with_context(|| format!("PIMCTL_TIMEOUT_SECS is not a number: {secs}"))?;
        }

        if let Ok(host) = env::var("AZURE_AUTHORITY_HOST") {
            self.credential.authority_host = host;
        }

        if let Ok(log_level) = env::var("RUST_LOG") {
            self.logging.level = log_level;
        }

        Ok(())
    }

    /// Validate that required configuration is present.
    fn validate(&self) -> Result<()> {
        if self.session.timeout_seconds == 0 {
            anyhow::bail!("session.timeout_seconds must be greater than zero");
        }

        if self.api.management_base_url.is_empty() || self.api.graph_base_url.is_empty() {
            anyhow::bail!("api base URLs must not be empty");
        }

        if self.credential.authority_host.is_empty() {
            anyhow::bail!("credential.authority_host must not be empty");
        }

        if self.credential.sources.is_empty() {
            anyhow::bail!(
                "credential.sources is empty; configure at least one of \
                 environment, azure_cli, managed_identity"
            );
        }

        Ok(())
    }

    /// Timeout window for one operation against the management API.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session.timeout_seconds)
    }

    /// Management API base URL without a trailing slash.
    pub fn management_base_url(&self) -> &str {
        self.api.management_base_url.trim_end_matches('/')
    }

    /// Token resource identifier for the management API.
    pub fn management_resource(&self) -> String {
        format!("{}/", self.management_base_url())
    }

    /// Token resource identifier for Microsoft Graph.
    pub fn graph_resource(&self) -> String {
        resource_origin(&self.api.graph_base_url)
    }
}

/// Path of the optional user configuration file.
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "pimctl").map(|dirs| dirs.config_dir().join(USER_CONFIG_FILE))
}

/// Recursively merge `overlay` into `base`; tables merge, everything else replaces.
fn merge(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base), toml::Value::Table(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(existing) => merge(existing, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

/// `https://graph.microsoft.com/v1.0` -> `https://graph.microsoft.com/`
fn resource_origin(raw: &str) -> String {
    match url::Url::parse(raw) {
        Ok(parsed) => format!("{}/", parsed.origin().ascii_serialization()),
        Err(_) => raw.to_string(),
    }
}

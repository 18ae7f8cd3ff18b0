//! Ambient credential discovery.
//!
//! A [`ChainedCredential`] tries each configured source in order and sticks
//! with the first one that produces a token.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};
use zeroize::Zeroizing;

use super::azure_cli::AzureCliCredential;
use super::environment::EnvironmentCredential;
use super::managed_identity::ManagedIdentityCredential;
use crate::config::{Config, CredentialSource};
use crate::error::CredentialError;

/// Tokens are refreshed this long before they expire.
const EXPIRY_MARGIN_SECONDS: i64 = 300;

/// A bearer token for one resource.
#[derive(Clone)]
pub struct AccessToken {
    /// Raw bearer token, cleared from memory on drop.
    pub secret: Zeroizing<String>,
    pub expires_on: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: String, expires_on: DateTime<Utc>) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            expires_on,
        }
    }

    /// Whether the token is still usable for at least the refresh margin.
    pub fn is_fresh(&self) -> bool {
        self.expires_on - Utc::now() > chrono::Duration::seconds(EXPIRY_MARGIN_SECONDS)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Something that can produce bearer tokens for Azure resources.
#[async_trait]
pub trait TokenCredential: Send + Sync {
    /// Short source name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Obtain a token for `resource` (e.g. `https://management.azure.com/`).
    async fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError>;
}

/// Prioritized chain of credential sources with an in-memory token cache.
pub struct ChainedCredential {
    sources: Vec<Arc<dyn TokenCredential>>,
    selected: Mutex<Option<usize>>,
    tokens: Mutex<HashMap<String, AccessToken>>,
}

impl ChainedCredential {
    pub fn new(sources: Vec<Arc<dyn TokenCredential>>) -> Self {
        Self {
            sources,
            selected: Mutex::new(None),
            tokens: Mutex::new(HashMap::new()),
        }
    }

    /// Build the chain described by `config.credential.sources`.
    pub fn from_config(config: &Config) -> Result<Self, CredentialError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.api.connect_timeout_seconds))
            .timeout(config.session_timeout())
            .build()
            .map_err(|e| CredentialError::failed("http", e.to_string()))?;

        let sources = config
            .credential
            .sources
            .iter()
            .map(|source| -> Arc<dyn TokenCredential> {
                match source {
                    CredentialSource::Environment => Arc::new(EnvironmentCredential::from_env(
                        http_client.clone(),
                        &config.credential.authority_host,
                    )),
                    CredentialSource::AzureCli => Arc::new(AzureCliCredential::new()),
                    CredentialSource::ManagedIdentity => {
                        Arc::new(ManagedIdentityCredential::from_env(
                            http_client.clone(),
                            &config.credential.imds_endpoint,
                            Duration::from_secs(config.credential.imds_timeout_seconds),
                        ))
                    }
                }
            })
            .collect();

        Ok(Self::new(sources))
    }

    async fn token_from_chain(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        let mut selected = self.selected.lock().await;

        if let Some(index) = *selected {
            return self.sources[index].get_token(resource).await;
        }

        let mut failures = Vec::with_capacity(self.sources.len());
        for (index, source) in self.sources.iter().enumerate() {
            match source.get_token(resource).await {
                Ok(token) => {
                    info!("Using {} credential", source.name());
                    *selected = Some(index);
                    return Ok(token);
                }
                Err(e) => {
                    debug!("{} credential unavailable: {}", source.name(), e);
                    failures.push(e.to_string());
                }
            }
        }

        Err(CredentialError::Exhausted(failures))
    }
}

#[async_trait]
impl TokenCredential for ChainedCredential {
    fn name(&self) -> &'static str {
        "chained"
    }

    async fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        if let Some(token) = self.tokens.lock().await.get(resource) {
            if token.is_fresh() {
                return Ok(token.clone());
            }
        }

        let token = self.token_from_chain(resource).await?;
        self.tokens
            .lock()
            .await
            .insert(resource.to_string(), token.clone());
        Ok(token)
    }
}

/// Convert an `expires_in` seconds value into an absolute expiry.
pub(crate) fn expiry_from_seconds(expires_in: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::seconds(expires_in)
}

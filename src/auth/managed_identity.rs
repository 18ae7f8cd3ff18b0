//! Managed identity credential for Azure-hosted compute.
//!
//! App Service and Functions expose `IDENTITY_ENDPOINT`/`IDENTITY_HEADER`;
//! virtual machines answer on the instance metadata service.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer};
use tracing::debug;
use zeroize::Zeroizing;

use super::credential::{AccessToken, TokenCredential};
use crate::error::CredentialError;

const NAME: &str = "managed_identity";

const IMDS_API_VERSION: &str = "2018-02-01";
const APP_SERVICE_API_VERSION: &str = "2019-08-01";

#[derive(Debug, Clone)]
enum Endpoint {
    AppService {
        url: String,
        header: Zeroizing<String>,
    },
    Imds {
        url: String,
    },
}

pub struct ManagedIdentityCredential {
    endpoint: Endpoint,
    client_id: Option<String>,
    probe_timeout: Duration,
    http_client: reqwest::Client,
}

impl ManagedIdentityCredential {
    pub fn from_env(http_client: reqwest::Client, imds_endpoint: &str, probe_timeout: Duration) -> Self {
        let endpoint = match (env::var("IDENTITY_ENDPOINT"), env::var("IDENTITY_HEADER")) {
            (Ok(url), Ok(header)) => Endpoint::AppService {
                url,
                header: Zeroizing::new(header),
            },
            _ => Endpoint::Imds {
                url: imds_endpoint.to_string(),
            },
        };

        Self {
            endpoint,
            client_id: env::var("AZURE_CLIENT_ID").ok().filter(|id| !id.is_empty()),
            probe_timeout,
            http_client,
        }
    }

    fn request(&self, resource: &str) -> reqwest::RequestBuilder {
        let mut query = vec![("resource", resource.to_string())];
        if let Some(client_id) = &self.client_id {
            query.push(("client_id", client_id.clone()));
        }

        match &self.endpoint {
            Endpoint::AppService { url, header } => {
                query.push(("api-version", APP_SERVICE_API_VERSION.to_string()));
                self.http_client
                    .get(url)
                    .header("X-IDENTITY-HEADER", header.as_str())
                    .query(&query)
            }
            Endpoint::Imds { url } => {
                query.push(("api-version", IMDS_API_VERSION.to_string()));
                // The metadata service is link-local; fail fast when it is absent.
                self.http_client
                    .get(url)
                    .header("Metadata", "true")
                    .timeout(self.probe_timeout)
                    .query(&query)
            }
        }
    }
}

#[async_trait]
impl TokenCredential for ManagedIdentityCredential {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        debug!("Requesting managed identity token for {}", resource);

        let response = self.request(resource).send().await.map_err(|e| {
            if e.is_connect() || e.is_timeout() {
                CredentialError::NotConfigured(NAME)
            } else {
                CredentialError::failed(NAME, e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CredentialError::failed(
                NAME,
                format!("HTTP {} - {}", status.as_u16(), body),
            ));
        }

        let token: ManagedIdentityToken = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

        let expires_on = chrono::DateTime::from_timestamp(token.expires_on, 0).ok_or_else(|| {
            CredentialError::InvalidResponse(format!("bad expires_on {}", token.expires_on))
        })?;

        Ok(AccessToken::new(token.access_token, expires_on))
    }
}

/// Token payload shared by IMDS and App Service.
#[derive(Debug, Deserialize)]
struct ManagedIdentityToken {
    access_token: String,
    /// Seconds since the epoch; IMDS sends it as a string.
    #[serde(deserialize_with = "number_or_string")]
    expires_on: i64,
}

fn number_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(i64),
        Text(String),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

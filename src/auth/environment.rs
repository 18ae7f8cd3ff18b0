//! Service principal credential read from the process environment.

use std::env;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error};
use zeroize::Zeroizing;

use super::credential::{expiry_from_seconds, AccessToken, TokenCredential};
use crate::error::CredentialError;

const NAME: &str = "environment";

/// Client secret settings taken from `AZURE_TENANT_ID`, `AZURE_CLIENT_ID` and
/// `AZURE_CLIENT_SECRET`.
#[derive(Debug, Clone)]
struct ClientSecretSettings {
    tenant_id: String,
    client_id: String,
    client_secret: Zeroizing<String>,
}

/// OAuth2 client-credentials grant for a service principal.
pub struct EnvironmentCredential {
    settings: Option<ClientSecretSettings>,
    authority_host: String,
    http_client: reqwest::Client,
}

impl EnvironmentCredential {
    pub fn from_env(http_client: reqwest::Client, authority_host: &str) -> Self {
        let settings = match (
            env::var("AZURE_TENANT_ID"),
            env::var("AZURE_CLIENT_ID"),
            env::var("AZURE_CLIENT_SECRET"),
        ) {
            (Ok(tenant_id), Ok(client_id), Ok(client_secret))
                if !tenant_id.is_empty() && !client_id.is_empty() && !client_secret.is_empty() =>
            {
                Some(ClientSecretSettings {
                    tenant_id,
                    client_id,
                    client_secret: Zeroizing::new(client_secret),
                })
            }
            _ => None,
        };

        Self {
            settings,
            authority_host: authority_host.trim_end_matches('/').to_string(),
            http_client,
        }
    }

    fn token_endpoint(&self, tenant_id: &str) -> String {
        format!("{}/{}/oauth2/v2.0/token", self.authority_host, tenant_id)
    }
}

/// Convert a resource identifier into a v2 endpoint scope.
pub(crate) fn resource_to_scope(resource: &str) -> String {
    format!("{}/.default", resource.trim_end_matches('/'))
}

#[async_trait]
impl TokenCredential for EnvironmentCredential {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        let settings = self
            .settings
            .as_ref()
            .ok_or(CredentialError::NotConfigured(NAME))?;

        let scope = resource_to_scope(resource);
        let params = [
            ("client_id", settings.client_id.as_str()),
            ("client_secret", settings.client_secret.as_str()),
            ("grant_type", "client_credentials"),
            ("scope", scope.as_str()),
        ];

        let endpoint = self.token_endpoint(&settings.tenant_id);
        debug!("Requesting client credentials token from {}", endpoint);

        let response = self
            .http_client
            .post(&endpoint)
            .form(&params)
            .send()
            .await
            .map_err(|e| CredentialError::failed(NAME, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_body = response.text().await.unwrap_or_default();
            error!("Client credentials token request failed: HTTP {} - {}", status, error_body);
            return Err(CredentialError::failed(NAME, format!("HTTP {}", status.as_u16())));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

        Ok(AccessToken::new(
            token.access_token,
            expiry_from_seconds(token.expires_in),
        ))
    }
}

/// Token response from the Microsoft identity platform.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

//! Microsoft Graph API client for looking up the signed-in principal.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::credential::TokenCredential;
use crate::config::Config;
use crate::error::ApiError;

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Microsoft Graph API client.
pub struct GraphClient {
    base_url: String,
    resource: String,
    credential: Arc<dyn TokenCredential>,
    http_client: reqwest::Client,
}

impl GraphClient {
    /// Create a new Graph client.
    pub fn new(config: &Config, credential: Arc<dyn TokenCredential>) -> Result<Self, ApiError> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(Duration::from_secs(config.api.connect_timeout_seconds))
            .build()
            .map_err(|e| ApiError::GraphRequestFailed(e.to_string()))?;

        Ok(Self {
            base_url: config.api.graph_base_url.trim_end_matches('/').to_string(),
            resource: config.graph_resource(),
            credential,
            http_client,
        })
    }

    /// Fetch the current user's profile.
    pub async fn me(&self) -> Result<UserProfile, ApiError> {
        let url = format!("{}/me?$select=id,displayName,userPrincipalName", self.base_url);
        let token = self.credential.get_token(&self.resource).await?;

        debug!("Fetching signed-in user from {}", url);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(token.secret.as_str())
            .send()
            .await
            .map_err(|e| ApiError::GraphRequestFailed(e.to_string()))?;

        match response.status().as_u16() {
            200 => {
                let profile: UserProfile = response
                    .json()
                    .await
                    .map_err(|e| ApiError::ParseFailed(e.to_string()))?;
                Ok(profile)
            }
            401 => Err(ApiError::Unauthorized),
            403 => Err(ApiError::Forbidden),
            429 => Err(ApiError::RateLimited),
            // Don't expose raw API error details - just log status code
            status => Err(ApiError::GraphRequestFailed(format!("HTTP {}", status))),
        }
    }
}

/// User profile from Microsoft Graph /me endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    /// Object id; this is the principal id PIM expects.
    pub id: String,

    pub display_name: Option<String>,

    /// User Principal Name (typically email-like format).
    pub user_principal_name: Option<String>,
}

impl UserProfile {
    /// Get the best available display name.
    pub fn display_name_or_upn(&self) -> String {
        self.display_name
            .clone()
            .or_else(|| self.user_principal_name.clone())
            .unwrap_or_else(|| "Unknown User".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_profile_display_name() {
        let profile = UserProfile {
            id: "123".into(),
            display_name: Some("John Doe".into()),
            user_principal_name: Some("john@example.com".into()),
        };

        assert_eq!(profile.display_name_or_upn(), "John Doe");
    }

    #[test]
    fn test_user_profile_fallback() {
        let profile: UserProfile = serde_json::from_str(
            r#"{"@odata.context":"https://graph.microsoft.com/v1.0/$metadata#users/$entity","id":"123","displayName":null,"userPrincipalName":"user@tenant.com"}"#,
        )
        .unwrap();

        assert_eq!(profile.id, "123");
        assert_eq!(profile.display_name_or_upn(), "user@tenant.com");
    }
}

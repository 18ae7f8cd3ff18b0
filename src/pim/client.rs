//! Azure Resource Manager client for the PIM endpoints.
//!
//! Uses the Azure Resource Management API to list subscriptions and role
//! eligibility schedules and to create role assignment schedule requests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info};
use url::Url;

use super::models::{
    ErrorResponse, RoleAssignmentScheduleRequest, RoleEligibilitySchedule, ScheduleRequestResponse,
    Scope, SubscriptionRecord,
};
use super::pager::Page;
use crate::auth::TokenCredential;
use crate::config::Config;
use crate::error::PimError;

/// The management API operations a session needs.
#[async_trait]
pub trait ManagementApi: Send + Sync {
    /// `GET /subscriptions`; `next_link` continues a previous page.
    async fn subscriptions_page(
        &self,
        next_link: Option<String>,
    ) -> Result<Page<SubscriptionRecord>, PimError>;

    /// `GET {scope}/providers/Microsoft.Authorization/roleEligibilitySchedules`.
    async fn role_eligibility_schedules_page(
        &self,
        scope: &Scope,
        next_link: Option<String>,
    ) -> Result<Page<RoleEligibilitySchedule>, PimError>;

    /// `PUT {scope}/providers/Microsoft.Authorization/roleAssignmentScheduleRequests/{request_id}`.
    async fn create_role_assignment_schedule_request(
        &self,
        scope: &Scope,
        request_id: &str,
        request: &RoleAssignmentScheduleRequest,
    ) -> Result<ScheduleRequestResponse, PimError>;
}

/// Bearer-authenticated HTTP implementation of [`ManagementApi`].
pub struct ManagementClient {
    http_client: Client,
    credential: Arc<dyn TokenCredential>,
    base_url: String,
    resource: String,
    api_version_subscriptions: String,
    api_version_authorization: String,
}

impl ManagementClient {
    /// Create a new management client.
    ///
    /// `request_timeout` bounds each individual HTTP request.
    pub fn new(
        config: &Config,
        credential: Arc<dyn TokenCredential>,
        request_timeout: Duration,
    ) -> Result<Self, PimError> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .connect_timeout(Duration::from_secs(config.api.connect_timeout_seconds))
            .build()
            .map_err(PimError::Network)?;

        Ok(Self {
            http_client,
            credential,
            base_url: config.management_base_url().to_string(),
            resource: config.management_resource(),
            api_version_subscriptions: config.api.api_version_subscriptions.clone(),
            api_version_authorization: config.api.api_version_authorization.clone(),
        })
    }

    /// Obtain a management token; used to validate the identity up front.
    pub async fn authenticate(&self) -> Result<(), PimError> {
        self.credential.get_token(&self.resource).await?;
        Ok(())
    }

    fn url(&self, path: &str, api_version: &str) -> Result<Url, PimError> {
        let mut url = Url::parse(&format!("{}{}", self.base_url, path))
            .map_err(|e| PimError::InvalidResponse(format!("invalid URL for {path}: {e}")))?;
        url.query_pairs_mut().append_pair("api-version", api_version);
        Ok(url)
    }

    /// `nextLink` values are absolute and already carry the api-version.
    fn next_url(link: &str) -> Result<Url, PimError> {
        Url::parse(link).map_err(|e| PimError::InvalidResponse(format!("invalid nextLink: {e}")))
    }

    async fn get_page<T: DeserializeOwned>(&self, url: Url) -> Result<Page<T>, PimError> {
        debug!("GET {}", url);
        let token = self.credential.get_token(&self.resource).await?;

        let response = self
            .http_client
            .get(url)
            .bearer_auth(token.secret.as_str())
            .send()
            .await
            .map_err(PimError::Network)?;

        let response = check_status(response).await?;
        response
            .json()
            .await
            .map_err(|e| PimError::InvalidResponse(e.to_string()))
    }
}

/// Map non-success statuses onto [`PimError`].
async fn check_status(response: Response) -> Result<Response, PimError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    match status.as_u16() {
        401 => Err(PimError::Unauthorized),
        403 => Err(PimError::Forbidden),
        code => {
            let body = response.text().await.unwrap_or_default();
            error!("Request failed: HTTP {} - {}", status, body);
            Err(rejected(code, &body))
        }
    }
}

fn rejected(status: u16, body: &str) -> PimError {
    let detail = serde_json::from_str::<ErrorResponse>(body)
        .ok()
        .and_then(|r| r.error)
        .unwrap_or_default();

    PimError::ProviderRejected {
        status,
        code: detail.code.unwrap_or_else(|| "Unknown".to_string()),
        message: detail.message.unwrap_or_else(|| format!("HTTP {status}")),
    }
}

#[async_trait]
impl ManagementApi for ManagementClient {
    async fn subscriptions_page(
        &self,
        next_link: Option<String>,
    ) -> Result<Page<SubscriptionRecord>, PimError> {
        let url = match next_link {
            Some(link) => Self::next_url(&link)?,
            None => self.url("/subscriptions", &self.api_version_subscriptions)?,
        };
        self.get_page(url).await
    }

    async fn role_eligibility_schedules_page(
        &self,
        scope: &Scope,
        next_link: Option<String>,
    ) -> Result<Page<RoleEligibilitySchedule>, PimError> {
        let url = match next_link {
            Some(link) => Self::next_url(&link)?,
            None => self.url(
                &format!(
                    "{}/providers/Microsoft.Authorization/roleEligibilitySchedules",
                    scope
                ),
                &self.api_version_authorization,
            )?,
        };
        self.get_page(url).await
    }

    async fn create_role_assignment_schedule_request(
        &self,
        scope: &Scope,
        request_id: &str,
        request: &RoleAssignmentScheduleRequest,
    ) -> Result<ScheduleRequestResponse, PimError> {
        let url = self.url(
            &format!(
                "{}/providers/Microsoft.Authorization/roleAssignmentScheduleRequests/{}",
                scope, request_id
            ),
            &self.api_version_authorization,
        )?;
        let token = self.credential.get_token(&self.resource).await?;

        debug!("PUT {}", url);

        let response = self
            .http_client
            .put(url)
            .bearer_auth(token.secret.as_str())
            .json(request)
            .send()
            .await
            .map_err(PimError::Network)?;

        let response = check_status(response).await?;
        let body = response.text().await.map_err(PimError::Network)?;

        match serde_json::from_str::<serde_json::Value>(&body)
            .and_then(|v| serde_json::to_string_pretty(&v))
        {
            Ok(pretty) => info!("Role assignment schedule request created:\n{}", pretty),
            Err(_) => info!("Role assignment schedule request created: {}", body),
        }

        serde_json::from_str(&body).map_err(|e| PimError::InvalidResponse(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::credential::tests::StaticCredential;
    use crate::pim::models::SubscriptionId;

    fn client() -> ManagementClient {
        let config: Config = toml::from_str(include_str!("../../config.toml")).unwrap();
        ManagementClient::new(
            &config,
            Arc::new(StaticCredential::ok("test", "token")),
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[test]
    fn test_urls() {
        let client = client();
        let scope = SubscriptionId::new("sub-1").scope();

        let url = client
            .url(
                &format!("{}/providers/Microsoft.Authorization/roleEligibilitySchedules", scope),
                "2020-10-01",
            )
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://management.azure.com/subscriptions/sub-1/providers/Microsoft.Authorization/roleEligibilitySchedules?api-version=2020-10-01"
        );

        let url = client.url("/subscriptions", "2022-12-01").unwrap();
        assert_eq!(
            url.as_str(),
            "https://management.azure.com/subscriptions?api-version=2022-12-01"
        );
    }

    fn response(status: u16, body: &str) -> Response {
        http::Response::builder()
            .status(status)
            .body(body.to_string())
            .unwrap()
            .into()
    }

    #[tokio::test]
    async fn test_check_status_maps_auth_failures() {
        let err = check_status(response(401, "")).await.unwrap_err();
        assert!(matches!(err, PimError::Unauthorized));

        let err = check_status(response(403, r#"{"error":{"code":"AuthorizationFailed"}}"#))
            .await
            .unwrap_err();
        assert!(matches!(err, PimError::Forbidden));
    }

    #[tokio::test]
    async fn test_check_status_passes_success_and_rejects_the_rest() {
        let ok = check_status(response(201, "{}")).await.unwrap();
        assert_eq!(ok.status().as_u16(), 201);

        let err = check_status(response(
            400,
            r#"{"error":{"code":"RoleAssignmentExists","message":"The Role assignment already exists."}}"#,
        ))
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            PimError::ProviderRejected { status: 400, ref code, .. } if code == "RoleAssignmentExists"
        ));
    }

    #[test]
    fn test_rejected_parses_error_envelope() {
        let err = rejected(
            400,
            r#"{"error":{"code":"RoleAssignmentRequestPolicyValidationFailed","message":"The following policy rules failed: [\"ExpirationRule\"]"}}"#,
        );
        match err {
            PimError::ProviderRejected {
                status,
                code,
                message,
            } => {
                assert_eq!(status, 400);
                assert_eq!(code, "RoleAssignmentRequestPolicyValidationFailed");
                assert!(message.contains("ExpirationRule"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_rejected_without_envelope() {
        let err = rejected(502, "<html>Bad Gateway</html>");
        assert!(matches!(
            err,
            PimError::ProviderRejected { status: 502, ref code, .. } if code == "Unknown"
        ));
    }
}

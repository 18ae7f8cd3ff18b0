//! Session: authenticated access to subscriptions, eligibility schedules and
//! role activation for one principal.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time;
use tracing::{debug, info};
use uuid::Uuid;

use super::client::{ManagementApi, ManagementClient};
use super::models::{
    ActivationRequest, RoleEligibilitySchedule, ScheduleRequestResponse, Scope, SubscriptionId,
};
use super::pager::{drain_by_name, Pager};
use crate::auth::TokenCredential;
use crate::config::Config;
use crate::error::{PartialListing, PimError};

/// Name-keyed listing, or the partial listing plus the reason it stopped.
pub type Listing<V> = Result<HashMap<String, V>, PartialListing<V>>;

/// Immutable per-invocation session.
pub struct Session {
    api: Arc<dyn ManagementApi>,
    principal_id: String,
    timeout: Duration,
}

impl Session {
    pub fn new(api: Arc<dyn ManagementApi>, principal_id: impl Into<String>, timeout: Duration) -> Self {
        Self {
            api,
            principal_id: principal_id.into(),
            timeout,
        }
    }

    /// Discover the ambient credential and build a session against the
    /// configured management endpoint.
    ///
    /// Fails with a credential error when no identity source yields a token.
    pub async fn connect(
        config: &Config,
        credential: Arc<dyn TokenCredential>,
        principal_id: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, PimError> {
        let client = ManagementClient::new(config, credential, timeout)?;
        time::timeout(timeout, client.authenticate())
            .await
            .map_err(|_| PimError::Timeout(timeout))??;

        Ok(Self::new(Arc::new(client), principal_id, timeout))
    }

    /// All enabled subscriptions, keyed by display name.
    ///
    /// The whole drain shares one timeout window.
    pub async fn subscriptions(&self) -> Listing<SubscriptionId> {
        let mut subscriptions = HashMap::new();

        match self.collect_subscriptions(&mut subscriptions).await {
            Ok(duplicates) => {
                debug!(
                    "Found {} enabled subscriptions ({} duplicate names ignored)",
                    subscriptions.len(),
                    duplicates
                );
                Ok(subscriptions)
            }
            Err(e) => Err(PartialListing::new(subscriptions, e)),
        }
    }

    /// Drain the subscription listing into `subscriptions` and return the
    /// number of duplicate names dropped.
    async fn collect_subscriptions(
        &self,
        subscriptions: &mut HashMap<String, SubscriptionId>,
    ) -> Result<usize, PimError> {
        let api = self.api.as_ref();
        let mut pager = Pager::new(move |link| api.subscriptions_page(link));

        time::timeout(
            self.timeout,
            drain_by_name(&mut pager, subscriptions, "subscription", |record| {
                record.into_enabled_entry()
            }),
        )
        .await
        .map_err(|_| PimError::Timeout(self.timeout))?
    }

    /// All role eligibility schedules visible at `scope`, keyed by role
    /// display name.
    pub async fn role_eligibility_schedules(&self, scope: &Scope) -> Listing<RoleEligibilitySchedule> {
        let api = self.api.as_ref();
        let mut pager = Pager::new(move |link| api.role_eligibility_schedules_page(scope, link));
        let mut schedules = HashMap::new();

        let drained = time::timeout(
            self.timeout,
            drain_by_name(&mut pager, &mut schedules, "eligibility for role", |schedule| {
                let name = schedule
                    .role_display_name()
                    .ok_or_else(|| {
                        PimError::DataIntegrity(
                            "role eligibility schedule without role definition displayName"
                                .to_string(),
                        )
                    })?
                    .to_string();
                Ok(Some((name, schedule)))
            }),
        )
        .await;

        match drained {
            Ok(Ok(_)) => {
                debug!("Found {} eligible roles at {}", schedules.len(), scope);
                Ok(schedules)
            }
            Ok(Err(e)) => Err(PartialListing::new(schedules, e)),
            Err(_) => Err(PartialListing::new(schedules, PimError::Timeout(self.timeout))),
        }
    }

    async fn resolve_subscription(&self, name: &str) -> Result<SubscriptionId, PimError> {
        let mut subscriptions = self.subscriptions().await?;
        subscriptions
            .remove(name)
            .ok_or_else(|| PimError::SubscriptionNotFound(name.to_string()))
    }

    /// Names of the roles with an eligibility schedule in the named
    /// subscription, in no particular order.
    pub async fn roles_for_subscription(&self, subscription_name: &str) -> Result<Vec<String>, PimError> {
        let subscription_id = self.resolve_subscription(subscription_name).await?;
        let schedules = self
            .role_eligibility_schedules(&subscription_id.scope())
            .await?;

        Ok(schedules.into_keys().collect())
    }

    /// Self-activate `role_name` in the named subscription for `duration`,
    /// starting now.
    pub async fn activate_role(
        &self,
        subscription_name: &str,
        role_name: &str,
        justification: &str,
        duration: chrono::Duration,
    ) -> Result<ScheduleRequestResponse, PimError> {
        if self.principal_id.is_empty() {
            return Err(PimError::MissingPrincipal);
        }
        if duration.num_minutes() < 1 {
            return Err(PimError::InvalidDuration(format!(
                "{} whole minutes requested",
                duration.num_minutes()
            )));
        }

        let subscription_id = self.resolve_subscription(subscription_name).await?;
        let scope = subscription_id.scope();

        let mut schedules = self.role_eligibility_schedules(&scope).await?;
        let schedule = schedules
            .remove(role_name)
            .ok_or_else(|| PimError::RoleNotFound {
                role: role_name.to_string(),
                subscription: subscription_name.to_string(),
            })?;

        let body = ActivationRequest {
            principal_id: &self.principal_id,
            schedule: &schedule,
            justification,
            duration,
        }
        .into_body(Utc::now())?;

        let request_id = Uuid::new_v4().to_string();

        info!(
            "Activating role {} on {} for {} minutes (request {})",
            role_name,
            subscription_name,
            duration.num_minutes(),
            request_id
        );

        time::timeout(
            self.timeout,
            self.api
                .create_role_assignment_schedule_request(&scope, &request_id, &body),
        )
        .await
        .map_err(|_| PimError::Timeout(self.timeout))?
    }
}

//! PIM data models for Azure Privileged Identity Management.
//!
//! Wire records keep every provider-populated field optional so that a
//! missing value is reported as a data integrity failure instead of a
//! deserialization error.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::PimError;

/// Subscription state the listing keeps.
pub const SUBSCRIPTION_STATE_ENABLED: &str = "Enabled";

/// Provider-assigned subscription identifier (GUID).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(String);

impl SubscriptionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Subscription-level scope for this subscription.
    pub fn scope(&self) -> Scope {
        Scope::parse(&format!("subscriptions/{}", self.0))
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Authorization scope in canonical form (always with a leading slash),
/// e.g. `/subscriptions/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Scope(String);

impl Scope {
    /// Normalize a scope string, adding the leading slash when it is missing.
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim().trim_end_matches('/');
        if trimmed.starts_with('/') {
            Self(trimmed.to_string())
        } else {
            Self(format!("/{trimmed}"))
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One entry of `GET /subscriptions`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionRecord {
    pub subscription_id: Option<String>,
    pub display_name: Option<String>,
    pub state: Option<String>,
}

impl SubscriptionRecord {
    /// Validate the record and return `(display name, id)` for enabled
    /// subscriptions, `None` for any other state.
    pub fn into_enabled_entry(self) -> Result<Option<(String, SubscriptionId)>, PimError> {
        let (Some(display_name), Some(subscription_id), Some(state)) =
            (self.display_name, self.subscription_id, self.state)
        else {
            return Err(PimError::DataIntegrity(
                "subscription without displayName, subscriptionId or state".to_string(),
            ));
        };

        if state != SUBSCRIPTION_STATE_ENABLED {
            return Ok(None);
        }

        Ok(Some((display_name, SubscriptionId::new(subscription_id))))
    }
}

/// One entry of `roleEligibilitySchedules` listed for a scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleEligibilitySchedule {
    /// Full resource id of the schedule.
    pub id: Option<String>,
    pub name: Option<String>,
    pub properties: Option<RoleEligibilityScheduleProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleEligibilityScheduleProperties {
    pub role_definition_id: Option<String>,
    pub principal_id: Option<String>,
    pub principal_type: Option<String>,
    pub scope: Option<String>,
    pub status: Option<String>,
    pub member_type: Option<String>,
    pub start_date_time: Option<DateTime<Utc>>,
    pub end_date_time: Option<DateTime<Utc>>,
    pub expanded_properties: Option<ExpandedProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedProperties {
    pub role_definition: Option<ExpandedRoleDefinition>,
    pub scope: Option<ExpandedResource>,
    pub principal: Option<ExpandedResource>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedRoleDefinition {
    pub id: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub role_type: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExpandedResource {
    pub id: Option<String>,
    pub display_name: Option<String>,
    #[serde(rename = "type")]
    pub resource_type: Option<String>,
}

impl RoleEligibilitySchedule {
    /// Role display name reached through the expanded role definition.
    pub fn role_display_name(&self) -> Option<&str> {
        self.properties
            .as_ref()?
            .expanded_properties
            .as_ref()?
            .role_definition
            .as_ref()?
            .display_name
            .as_deref()
    }

    /// Role definition id of the eligible role.
    pub fn role_definition_id(&self) -> Option<&str> {
        self.properties.as_ref()?.role_definition_id.as_deref()
    }
}

/// Serialize a duration as a whole-minute ISO-8601 token, e.g. `PT90M`.
///
/// Fractions of a minute are truncated. Zero and negative durations are
/// serialized as-is.
pub fn iso8601_minutes(duration: Duration) -> String {
    format!("PT{}M", duration.num_minutes())
}

/// Body of `PUT .../roleAssignmentScheduleRequests/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleAssignmentScheduleRequest {
    pub properties: ActivationProperties,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationProperties {
    pub principal_id: String,
    pub role_definition_id: String,
    pub request_type: String,
    pub justification: String,
    pub linked_role_eligibility_schedule_id: String,
    pub schedule_info: ScheduleInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleInfo {
    pub start_date_time: DateTime<Utc>,
    pub expiration: Expiration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Expiration {
    #[serde(rename = "type")]
    pub expiration_type: String,
    pub duration: String,
}

/// Inputs for a self-activation.
#[derive(Debug, Clone)]
pub struct ActivationRequest<'a> {
    pub principal_id: &'a str,
    pub schedule: &'a RoleEligibilitySchedule,
    pub justification: &'a str,
    pub duration: Duration,
}

impl ActivationRequest<'_> {
    /// Build the request body, starting at `start`.
    pub fn into_body(self, start: DateTime<Utc>) -> Result<RoleAssignmentScheduleRequest, PimError> {
        let (Some(schedule_id), Some(role_definition_id)) =
            (self.schedule.id.as_ref(), self.schedule.role_definition_id())
        else {
            return Err(PimError::DataIntegrity(
                "role eligibility schedule without id or roleDefinitionId".to_string(),
            ));
        };

        Ok(RoleAssignmentScheduleRequest {
            properties: ActivationProperties {
                principal_id: self.principal_id.to_string(),
                role_definition_id: role_definition_id.to_string(),
                request_type: "SelfActivate".to_string(),
                justification: self.justification.to_string(),
                linked_role_eligibility_schedule_id: schedule_id.clone(),
                schedule_info: ScheduleInfo {
                    start_date_time: start,
                    expiration: Expiration {
                        expiration_type: "AfterDuration".to_string(),
                        duration: iso8601_minutes(self.duration),
                    },
                },
            },
        })
    }
}

/// Response of the create call; the provider echoes the request back.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScheduleRequestResponse {
    pub id: Option<String>,
    pub name: Option<String>,
    pub properties: Option<ScheduleRequestResponseProperties>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequestResponseProperties {
    pub status: Option<String>,
    pub request_type: Option<String>,
    pub created_on: Option<DateTime<Utc>>,
    pub justification: Option<String>,
}

impl ScheduleRequestResponse {
    /// Provider status, e.g. `Provisioned` or `PendingApproval`.
    pub fn status(&self) -> &str {
        self.properties
            .as_ref()
            .and_then(|p| p.status.as_deref())
            .unwrap_or("Unknown")
    }
}

/// Azure error envelope: `{"error": {"code": ..., "message": ...}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorResponse {
    pub error: Option<ErrorDetail>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorDetail {
    pub code: Option<String>,
    pub message: Option<String>,
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn schedule_json(role: &str) -> String {
        format!(
            r#"{{
                "id": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleEligibilitySchedules/sched-{role}",
                "name": "sched-{role}",
                "type": "Microsoft.Authorization/roleEligibilitySchedules",
                "properties": {{
                    "roleDefinitionId": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/def-{role}",
                    "principalId": "principal-1",
                    "principalType": "User",
                    "status": "Provisioned",
                    "memberType": "Direct",
                    "scope": "/subscriptions/sub-1",
                    "startDateTime": "2024-01-01T00:00:00Z",
                    "endDateTime": null,
                    "expandedProperties": {{
                        "principal": {{"id": "principal-1", "displayName": "Jane", "type": "User"}},
                        "roleDefinition": {{"id": "/providers/Microsoft.Authorization/roleDefinitions/def-{role}", "displayName": "{role}", "type": "BuiltInRole"}},
                        "scope": {{"id": "/subscriptions/sub-1", "displayName": "Prod", "type": "subscription"}}
                    }}
                }}
            }}"#
        )
    }

    #[test]
    fn test_iso8601_minutes() {
        assert_eq!(iso8601_minutes(Duration::minutes(90)), "PT90M");
        assert_eq!(iso8601_minutes(Duration::seconds(90)), "PT1M");
        assert_eq!(iso8601_minutes(Duration::seconds(59)), "PT0M");
        assert_eq!(iso8601_minutes(Duration::zero()), "PT0M");
        assert_eq!(iso8601_minutes(Duration::minutes(-5)), "PT-5M");
    }

    #[test]
    fn test_scope_normalization() {
        let sub = SubscriptionId::new("sub-1");
        assert_eq!(sub.scope().to_string(), "/subscriptions/sub-1");
        assert_eq!(Scope::parse("subscriptions/sub-1"), sub.scope());
        assert_eq!(Scope::parse("/subscriptions/sub-1/"), sub.scope());
    }

    #[test]
    fn test_subscription_record_states() {
        let enabled = SubscriptionRecord {
            subscription_id: Some("sub-1".into()),
            display_name: Some("Prod".into()),
            state: Some("Enabled".into()),
        };
        let (name, id) = enabled.into_enabled_entry().unwrap().unwrap();
        assert_eq!(name, "Prod");
        assert_eq!(id.to_string(), "sub-1");

        let disabled = SubscriptionRecord {
            subscription_id: Some("sub-2".into()),
            display_name: Some("Old".into()),
            state: Some("Disabled".into()),
        };
        assert!(disabled.into_enabled_entry().unwrap().is_none());

        let broken = SubscriptionRecord {
            subscription_id: Some("sub-3".into()),
            display_name: None,
            state: Some("Enabled".into()),
        };
        assert!(matches!(
            broken.into_enabled_entry(),
            Err(PimError::DataIntegrity(_))
        ));
    }

    #[test]
    fn test_schedule_parsing() {
        let schedule: RoleEligibilitySchedule =
            serde_json::from_str(&schedule_json("Contributor")).unwrap();
        assert_eq!(schedule.role_display_name(), Some("Contributor"));
        assert_eq!(
            schedule.role_definition_id(),
            Some("/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/def-Contributor")
        );

        let bare: RoleEligibilitySchedule = serde_json::from_str(r#"{"id": "x"}"#).unwrap();
        assert_eq!(bare.role_display_name(), None);
    }

    #[test]
    fn test_activation_body() {
        let schedule: RoleEligibilitySchedule =
            serde_json::from_str(&schedule_json("Contributor")).unwrap();
        let start = Utc::now();

        let body = ActivationRequest {
            principal_id: "principal-1",
            schedule: &schedule,
            justification: "on-call",
            duration: Duration::minutes(90),
        }
        .into_body(start)
        .unwrap();

        let json = serde_json::to_value(&body).unwrap();
        let props = &json["properties"];
        assert_eq!(props["principalId"], "principal-1");
        assert_eq!(props["requestType"], "SelfActivate");
        assert_eq!(props["justification"], "on-call");
        assert_eq!(
            props["linkedRoleEligibilityScheduleId"],
            "/subscriptions/sub-1/providers/Microsoft.Authorization/roleEligibilitySchedules/sched-Contributor"
        );
        assert_eq!(props["scheduleInfo"]["expiration"]["type"], "AfterDuration");
        assert_eq!(props["scheduleInfo"]["expiration"]["duration"], "PT90M");
    }

    #[test]
    fn test_activation_body_requires_ids() {
        let mut schedule: RoleEligibilitySchedule =
            serde_json::from_str(&schedule_json("Reader")).unwrap();
        schedule.id = None;

        let result = ActivationRequest {
            principal_id: "principal-1",
            schedule: &schedule,
            justification: "on-call",
            duration: Duration::minutes(60),
        }
        .into_body(Utc::now());

        assert!(matches!(result, Err(PimError::DataIntegrity(_))));
    }

    #[test]
    fn test_response_status() {
        let response: ScheduleRequestResponse = serde_json::from_str(
            r#"{"id":"/subscriptions/sub-1/providers/Microsoft.Authorization/roleAssignmentScheduleRequests/abc","name":"abc","properties":{"status":"Provisioned","requestType":"SelfActivate"}}"#,
        )
        .unwrap();
        assert_eq!(response.status(), "Provisioned");
        assert_eq!(ScheduleRequestResponse::default().status(), "Unknown");
    }
}

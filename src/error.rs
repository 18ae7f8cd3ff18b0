//! Error types for pimctl.
//!
//! Uses `thiserror` for library-style errors with automatic `Display` and `Error` implementations.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

/// Failures obtaining an ambient credential.
#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("{0} credential is not configured")]
    NotConfigured(&'static str),

    #[error("{source_name} credential failed: {message}")]
    Failed {
        source_name: &'static str,
        message: String,
    },

    #[error("no usable Azure identity found ({})", .0.join("; "))]
    Exhausted(Vec<String>),

    #[error("invalid token response: {0}")]
    InvalidResponse(String),
}

impl CredentialError {
    pub(crate) fn failed(source_name: &'static str, message: impl Into<String>) -> Self {
        Self::Failed {
            source_name,
            message: message.into(),
        }
    }
}

/// Microsoft Graph errors.
#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Graph API request failed: {0}")]
    GraphRequestFailed(String),

    #[error("Failed to parse API response: {0}")]
    ParseFailed(String),

    #[error("Unauthorized (401): Token may be expired")]
    Unauthorized,

    #[error("Forbidden (403): Insufficient permissions")]
    Forbidden,

    #[error("Rate limited (429): Too many requests")]
    RateLimited,

    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl ApiError {
    /// Returns a user-friendly message for display on the terminal.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Unauthorized => "Session expired. Sign in again.",
            Self::Forbidden => "Insufficient permissions to read your Microsoft Graph profile.",
            Self::RateLimited => "Too many requests. Please wait and try again.",
            Self::Credential(_) => {
                "Sign in with 'az login', set AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET, \
                 or run on a host with a managed identity."
            }
            Self::GraphRequestFailed(_) | Self::ParseFailed(_) => {
                "Could not look up the signed-in user. Please try again."
            }
        }
    }
}

/// PIM (Privileged Identity Management) errors.
#[derive(Error, Debug)]
pub enum PimError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unauthorized (token expired or invalid)")]
    Unauthorized,

    #[error("Forbidden (insufficient permissions)")]
    Forbidden,

    #[error("Unexpected missing value returned: {0}")]
    DataIntegrity(String),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(String),

    #[error("Role eligibility schedule not found for role {role} in subscription {subscription}")]
    RoleNotFound { role: String, subscription: String },

    #[error("Request rejected by Azure (HTTP {status}, {code}): {message}")]
    ProviderRejected {
        status: u16,
        code: String,
        message: String,
    },

    #[error("Invalid API response: {0}")]
    InvalidResponse(String),

    #[error("Principal id is not set")]
    MissingPrincipal,

    #[error("Invalid activation duration: {0}")]
    InvalidDuration(String),
}

impl PimError {
    /// Returns a user-friendly message for display on the terminal.
    pub fn user_message(&self) -> &str {
        match self {
            Self::Credential(_) => {
                "Sign in with 'az login', set AZURE_TENANT_ID/AZURE_CLIENT_ID/AZURE_CLIENT_SECRET, \
                 or run on a host with a managed identity."
            }
            Self::Network(_) => "Network error. Check your connection.",
            Self::Timeout(_) => "Azure did not answer in time. Try again or raise --timeout.",
            Self::Unauthorized => "Session expired. Sign in again.",
            Self::Forbidden => "Insufficient permissions for this operation.",
            Self::DataIntegrity(_) | Self::InvalidResponse(_) => {
                "Unexpected response from Azure. Please try again."
            }
            Self::SubscriptionNotFound(_) => {
                "Subscription not found. List enabled subscriptions with 'pimctl subscriptions'."
            }
            Self::RoleNotFound { .. } => {
                "Role not found. List eligible roles with 'pimctl roles <subscription>'."
            }
            Self::ProviderRejected { code, .. } if code == "RoleAssignmentExists" => {
                "This role is already active."
            }
            Self::ProviderRejected { .. } => "Azure rejected the request.",
            Self::MissingPrincipal => {
                "Set --user-id (get it with 'pimctl whoami' or 'az ad signed-in-user show --query id')."
            }
            Self::InvalidDuration(_) => "Activation duration must be at least one minute.",
        }
    }
}

/// A name-keyed listing that stopped early.
///
/// Carries everything collected before the failure next to its cause.
#[derive(Error, Debug)]
#[error("{source}")]
pub struct PartialListing<V: std::fmt::Debug> {
    pub partial: HashMap<String, V>,
    #[source]
    pub source: PimError,
}

impl<V: std::fmt::Debug> PartialListing<V> {
    pub fn new(partial: HashMap<String, V>, source: PimError) -> Self {
        Self { partial, source }
    }
}

impl<V: std::fmt::Debug> From<PartialListing<V>> for PimError {
    fn from(listing: PartialListing<V>) -> Self {
        listing.source
    }
}

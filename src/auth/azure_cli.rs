//! Credential borrowed from an existing `az login` session.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDateTime, TimeZone, Utc};
use serde::Deserialize;
use tokio::process::Command;
use tracing::debug;

use super::credential::{AccessToken, TokenCredential};
use crate::error::CredentialError;

const NAME: &str = "azure_cli";

/// Runs `az account get-access-token` for each requested resource.
pub struct AzureCliCredential {
    program: String,
}

impl AzureCliCredential {
    pub fn new() -> Self {
        Self {
            program: if cfg!(windows) { "az.cmd" } else { "az" }.to_string(),
        }
    }
}

impl Default for AzureCliCredential {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenCredential for AzureCliCredential {
    fn name(&self) -> &'static str {
        NAME
    }

    async fn get_token(&self, resource: &str) -> Result<AccessToken, CredentialError> {
        debug!("Requesting token for {} from Azure CLI", resource);

        let output = Command::new(&self.program)
            .args([
                "account",
                "get-access-token",
                "--resource",
                resource,
                "--output",
                "json",
            ])
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    CredentialError::NotConfigured(NAME)
                } else {
                    CredentialError::failed(NAME, e.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CredentialError::failed(NAME, stderr.trim().to_string()));
        }

        parse_cli_token(&output.stdout)
    }
}

/// Output of `az account get-access-token -o json`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CliToken {
    access_token: String,
    /// Local wall-clock time, e.g. `2024-05-01 10:15:00.000000`.
    expires_on: String,
    /// POSIX timestamp, only emitted by newer CLI versions.
    #[serde(rename = "expires_on", default)]
    expires_on_posix: Option<i64>,
}

fn parse_cli_token(stdout: &[u8]) -> Result<AccessToken, CredentialError> {
    let token: CliToken = serde_json::from_slice(stdout)
        .map_err(|e| CredentialError::InvalidResponse(e.to_string()))?;

    let expires_on = match token.expires_on_posix {
        Some(ts) => DateTime::<Utc>::from_timestamp(ts, 0)
            .ok_or_else(|| CredentialError::InvalidResponse(format!("bad timestamp {ts}")))?,
        None => parse_local_time(&token.expires_on)?,
    };

    Ok(AccessToken::new(token.access_token, expires_on))
}

fn parse_local_time(raw: &str) -> Result<DateTime<Utc>, CredentialError> {
    let naive = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S%.f")
        .map_err(|e| CredentialError::InvalidResponse(format!("expiresOn {raw:?}: {e}")))?;

    Local
        .from_local_datetime(&naive)
        .earliest()
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| CredentialError::InvalidResponse(format!("expiresOn {raw:?} is ambiguous")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_timestamp() {
        let json = br#"{
            "accessToken": "eyJ0",
            "expiresOn": "2030-01-01 00:00:00.000000",
            "expires_on": 1714551300,
            "subscription": "sub-1",
            "tenant": "tenant-1",
            "tokenType": "Bearer"
        }"#;

        let token = parse_cli_token(json).unwrap();
        assert_eq!(token.secret.as_str(), "eyJ0");
        assert_eq!(token.expires_on.timestamp(), 1714551300);
    }

    #[test]
    fn test_parse_local_expiry() {
        let json = br#"{"accessToken":"eyJ0","expiresOn":"2024-05-01 10:15:00.000000","tokenType":"Bearer"}"#;
        let token = parse_cli_token(json).unwrap();
        assert_eq!(token.secret.as_str(), "eyJ0");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(matches!(
            parse_cli_token(b"ERROR: Please run 'az login'"),
            Err(CredentialError::InvalidResponse(_))
        ));
    }
}

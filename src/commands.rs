//! Command handlers.
//!
//! Each subcommand implements [`Command`]; [`Commands`] dispatches to them.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::auth::{ChainedCredential, GraphClient, TokenCredential};
use crate::cli::{parse_activation_duration, ActivateArgs, Commands, ListArgs, RolesArgs};
use crate::config::Config;
use crate::error::PimError;
use crate::pim::Session;

/// Everything a command needs, built once at start-up.
pub struct Context {
    pub config: Config,
    pub credential: Arc<ChainedCredential>,
    pub user_id: Option<String>,
    pub timeout: Duration,
}

impl Context {
    pub fn new(config: Config, user_id: Option<String>, timeout: Option<Duration>) -> Result<Self> {
        let credential = ChainedCredential::from_config(&config)
            .context("Failed to set up Azure credentials")?;
        let timeout = timeout.unwrap_or_else(|| config.session_timeout());

        Ok(Self {
            config,
            credential: Arc::new(credential),
            user_id: user_id.filter(|id| !id.is_empty()),
            timeout,
        })
    }

    async fn session(&self) -> Result<Session, PimError> {
        let credential: Arc<dyn TokenCredential> = self.credential.clone();
        Session::connect(
            &self.config,
            credential,
            self.user_id.clone().unwrap_or_default(),
            self.timeout,
        )
        .await
    }
}

#[async_trait]
pub trait Command {
    async fn run(self, ctx: &Context, out: &mut (dyn Write + Send)) -> Result<()>;
}

#[async_trait]
impl Command for Commands {
    async fn run(self, ctx: &Context, out: &mut (dyn Write + Send)) -> Result<()> {
        match self {
            Commands::Subscriptions(args) => SubscriptionsCommand(args).run(ctx, out).await,
            Commands::Roles(args) => args.run(ctx, out).await,
            Commands::Activate(args) => args.run(ctx, out).await,
            Commands::Whoami => WhoamiCommand.run(ctx, out).await,
        }
    }
}

pub struct SubscriptionsCommand(pub ListArgs);

#[async_trait]
impl Command for SubscriptionsCommand {
    async fn run(self, ctx: &Context, out: &mut (dyn Write + Send)) -> Result<()> {
        let session = ctx.session().await?;
        let subscriptions = match session.subscriptions().await {
            Ok(subscriptions) => subscriptions,
            Err(listing) => {
                if !listing.partial.is_empty() {
                    warn!(
                        "Listing stopped after {} subscriptions",
                        listing.partial.len()
                    );
                }
                return Err(PimError::from(listing).into());
            }
        };

        if self.0.json {
            let sorted: BTreeMap<_, _> = subscriptions
                .into_iter()
                .map(|(name, id)| (name, id.to_string()))
                .collect();
            writeln!(out, "{}", serde_json::to_string_pretty(&sorted)?)?;
        } else {
            write_names(out, subscriptions.into_keys())?;
        }
        Ok(())
    }
}

#[async_trait]
impl Command for RolesArgs {
    async fn run(self, ctx: &Context, out: &mut (dyn Write + Send)) -> Result<()> {
        let session = ctx.session().await?;
        let mut roles = session.roles_for_subscription(&self.subscription).await?;
        roles.sort();

        if self.list.json {
            writeln!(out, "{}", serde_json::to_string_pretty(&roles)?)?;
        } else {
            write_names(out, roles)?;
        }
        Ok(())
    }
}

#[async_trait]
impl Command for ActivateArgs {
    async fn run(self, ctx: &Context, out: &mut (dyn Write + Send)) -> Result<()> {
        if ctx.user_id.is_none() {
            return Err(PimError::MissingPrincipal.into());
        }

        let duration = parse_activation_duration(
            self.duration.as_deref(),
            ctx.config.session.default_activation_minutes,
        )
        .map_err(PimError::InvalidDuration)?;

        let session = ctx.session().await?;
        let response = session
            .activate_role(&self.subscription, &self.role, &self.justification, duration)
            .await?;

        writeln!(
            out,
            "Activated {} on {} for {} ({})",
            self.role,
            self.subscription,
            format_duration(duration),
            response.status()
        )?;
        Ok(())
    }
}

pub struct WhoamiCommand;

#[async_trait]
impl Command for WhoamiCommand {
    async fn run(self, ctx: &Context, out: &mut (dyn Write + Send)) -> Result<()> {
        let credential: Arc<dyn TokenCredential> = ctx.credential.clone();
        let graph = GraphClient::new(&ctx.config, credential)?;
        let profile = graph.me().await.context("Failed to look up the signed-in user")?;

        info!("Signed in as {}", profile.display_name_or_upn());
        writeln!(out, "{}", profile.id)?;
        Ok(())
    }
}

/// Write one name per line, sorted.
fn write_names(out: &mut (dyn Write + Send), names: impl IntoIterator<Item = String>) -> Result<()> {
    let mut names: Vec<String> = names.into_iter().collect();
    names.sort();
    for name in names {
        writeln!(out, "{}", name)?;
    }
    Ok(())
}

/// Format duration as human-readable string (e.g., "45 min", "1 hour").
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_minutes = duration.num_minutes();

    if total_minutes < 1 {
        "< 1 min".to_string()
    } else if total_minutes < 60 {
        format!("{} min", total_minutes)
    } else {
        let hours = total_minutes / 60;
        let mins = total_minutes % 60;
        if mins == 0 {
            format!("{} hour{}", hours, if hours == 1 { "" } else { "s" })
        } else {
            format!("{}h {}m", hours, mins)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn context(user_id: Option<&str>) -> Context {
        let config: Config = toml::from_str(include_str!("../config.toml")).unwrap();
        Context::new(config, user_id.map(str::to_string), None).unwrap()
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(ChronoDuration::seconds(30)), "< 1 min");
        assert_eq!(format_duration(ChronoDuration::minutes(45)), "45 min");
        assert_eq!(format_duration(ChronoDuration::hours(1)), "1 hour");
        assert_eq!(format_duration(ChronoDuration::hours(2)), "2 hours");
        assert_eq!(format_duration(ChronoDuration::minutes(90)), "1h 30m");
    }

    #[test]
    fn test_write_names_sorted() {
        let mut out = Vec::new();
        write_names(&mut out, vec!["Reader".to_string(), "Contributor".to_string()]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Contributor\nReader\n");
    }

    #[test]
    fn test_context_defaults() {
        let ctx = context(Some(""));
        assert!(ctx.user_id.is_none());
        assert_eq!(ctx.timeout, Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_activate_without_user_id_fails_before_network() {
        let ctx = context(None);
        let args = ActivateArgs {
            subscription: "Prod".into(),
            role: "Contributor".into(),
            justification: "on-call".into(),
            duration: None,
        };

        let mut out = Vec::new();
        let err = args.run(&ctx, &mut out).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PimError>(),
            Some(PimError::MissingPrincipal)
        ));
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_activate_rejects_bad_duration() {
        let ctx = context(Some("principal-1"));
        let args = ActivateArgs {
            subscription: "Prod".into(),
            role: "Contributor".into(),
            justification: "on-call".into(),
            duration: Some("later".into()),
        };

        let mut out = Vec::new();
        let err = args.run(&ctx, &mut out).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<PimError>(),
            Some(PimError::InvalidDuration(_))
        ));
    }
}

//! Command-line interface definitions.

use std::time::Duration;

use clap::{Args, Parser, Subcommand};

/// Azure PIM role activation from the terminal.
///
/// Lists enabled subscriptions and eligible roles, and self-activates a role
/// for a limited time with a justification.
#[derive(Parser, Debug)]
#[command(name = "pimctl", author, version, about)]
pub struct Cli {
    /// Principal (object) id of the acting user [get it with: pimctl whoami]
    #[arg(long = "user-id", visible_alias = "userid", env = "PIMCTL_USER_ID", global = true)]
    pub user_id: Option<String>,

    /// Timeout for each call to Azure, e.g. "30s" or "2m" [default: from config]
    #[arg(long, global = true, value_parser = humantime::parse_duration)]
    pub timeout: Option<Duration>,

    /// Enables debug logging on stderr
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List enabled subscriptions
    #[command(visible_alias = "s")]
    Subscriptions(ListArgs),

    /// List available roles
    #[command(visible_alias = "r")]
    Roles(RolesArgs),

    /// Activate a role assignment for a subscription
    #[command(visible_alias = "a")]
    Activate(ActivateArgs),

    /// Print the principal id of the signed-in identity
    #[command(visible_alias = "w")]
    Whoami,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Print JSON instead of one name per line
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct RolesArgs {
    /// Subscription display name
    pub subscription: String,

    #[command(flatten)]
    pub list: ListArgs,
}

#[derive(Args, Debug)]
pub struct ActivateArgs {
    /// Subscription display name
    pub subscription: String,

    /// Role display name, e.g. "Contributor"
    pub role: String,

    /// Reason recorded in the audit log
    pub justification: String,

    /// How long the activation lasts, e.g. "90m", "1h30m" or "45" (minutes)
    pub duration: Option<String>,
}

/// Parse an activation duration.
///
/// Empty means `default_minutes`; a bare integer is minutes; anything else is
/// a humantime string.
pub fn parse_activation_duration(
    raw: Option<&str>,
    default_minutes: u32,
) -> Result<chrono::Duration, String> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(chrono::Duration::minutes(i64::from(default_minutes)));
    }

    if let Ok(minutes) = raw.parse::<i64>() {
        return chrono::Duration::try_minutes(minutes)
            .ok_or_else(|| format!("{raw:?}: duration out of range"));
    }

    let parsed = humantime::parse_duration(raw).map_err(|e| format!("{raw:?}: {e}"))?;
    chrono::Duration::from_std(parsed).map_err(|e| format!("{raw:?}: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_aliases() {
        let cli = Cli::try_parse_from(["pimctl", "s"]).unwrap();
        assert!(matches!(cli.command, Commands::Subscriptions(_)));

        let cli = Cli::try_parse_from(["pimctl", "r", "Prod", "--json"]).unwrap();
        match cli.command {
            Commands::Roles(args) => {
                assert_eq!(args.subscription, "Prod");
                assert!(args.list.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_activate_args() {
        let cli = Cli::try_parse_from([
            "pimctl",
            "--userid",
            "principal-1",
            "a",
            "Prod",
            "Contributor",
            "on-call",
            "90m",
        ])
        .unwrap();

        assert_eq!(cli.user_id.as_deref(), Some("principal-1"));
        match cli.command {
            Commands::Activate(args) => {
                assert_eq!(args.subscription, "Prod");
                assert_eq!(args.role, "Contributor");
                assert_eq!(args.justification, "on-call");
                assert_eq!(args.duration.as_deref(), Some("90m"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_activate_requires_three_arguments() {
        assert!(Cli::try_parse_from(["pimctl", "activate", "Prod", "Contributor"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["pimctl", "s", "--timeout", "2m", "-v"]).unwrap();
        assert_eq!(cli.timeout, Some(Duration::from_secs(120)));
        assert!(cli.verbose);
    }

    #[test]
    fn test_parse_activation_duration() {
        let parse = |raw| parse_activation_duration(raw, 60).unwrap().num_minutes();

        assert_eq!(parse(None), 60);
        assert_eq!(parse(Some("")), 60);
        assert_eq!(parse(Some("90m")), 90);
        assert_eq!(parse(Some("1h30m")), 90);
        assert_eq!(parse(Some("1h 30m")), 90);
        assert_eq!(parse(Some("45")), 45);
        assert_eq!(parse(Some("90s")), 1);
        assert!(parse_activation_duration(Some("soon"), 60).is_err());
        assert!(parse_activation_duration(Some("900000000000000000"), 60).is_err());
        assert!(parse_activation_duration(Some("-900000000000000000"), 60).is_err());
    }
}

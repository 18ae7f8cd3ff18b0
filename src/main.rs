//! pimctl - Azure PIM role activation from the command line.
//!
//! Lists enabled subscriptions and eligible roles for the signed-in identity
//! and self-activates a role for a bounded duration.

#![deny(clippy::all)]

mod auth;
mod cli;
mod commands;
mod config;
mod error;
mod pim;

use std::io::{self, Write};

use anyhow::Result;
use clap::Parser;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use commands::{Command, Context};
use config::Config;
use error::{ApiError, PimError};

#[tokio::main]
async fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config, cli.verbose);
    debug!("pimctl v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli, config).await {
        debug!("{:?}", e);
        let _ = report(&e, &mut io::stderr());
        std::process::exit(1);
    }
}

/// Print the failure and, for known errors, a hint on what to do next.
fn report(e: &anyhow::Error, out: &mut impl Write) -> io::Result<()> {
    writeln!(out, "Error: {:#}", e)?;
    if let Some(pim) = e.downcast_ref::<PimError>() {
        writeln!(out, "{}", pim.user_message())?;
    } else if let Some(api) = e.downcast_ref::<ApiError>() {
        writeln!(out, "{}", api.user_message())?;
    }
    Ok(())
}

async fn run(cli: Cli, config: Config) -> Result<()> {
    let ctx = Context::new(config, cli.user_id, cli.timeout)?;
    let mut stdout = io::stdout();
    cli.command.run(&ctx, &mut stdout).await
}

/// Initialize tracing/logging on stderr so stdout only carries results.
fn init_logging(config: &Config, verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .without_time()
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_report_prints_error_once_with_hint() {
        let err = anyhow::Error::from(PimError::SubscriptionNotFound("Prod".into()));
        let mut out = Vec::new();
        report(&err, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("Subscription not found: Prod").count(), 1);
        assert_eq!(
            text,
            format!(
                "Error: Subscription not found: Prod\n{}\n",
                PimError::SubscriptionNotFound("Prod".into()).user_message()
            )
        );
    }

    #[test]
    fn test_report_without_hint() {
        let err = anyhow::anyhow!("boom");
        let mut out = Vec::new();
        report(&err, &mut out).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "Error: boom\n");
    }
}

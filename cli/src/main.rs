//! Operator CLI for the autopilot execution guard.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;

use commands::{AppContext, Commands};
use config::{AutopilotConfig, CliOverrides, LoggingSettings, default_config_path};

#[derive(Parser)]
#[command(
    name = "autopilot",
    version,
    about = "Kill switch, execution mode and idempotency ledger control for the autopilot"
)]
struct Cli {
    /// Config file (default: ~/.autopilot/autopilot.toml)
    #[arg(long, global = true, env = "AUTOPILOT_CONFIG")]
    config: Option<PathBuf>,
    /// Persistent store base URL
    #[arg(long, global = true)]
    store_url: Option<String>,
    /// Bearer token for the persistent store
    #[arg(long, global = true)]
    store_token: Option<String>,
    /// Also write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = cli.config.clone().unwrap_or_else(default_config_path);
    let overrides = CliOverrides {
        store_url: cli.store_url.clone(),
        store_token: cli.store_token.clone(),
        log_dir: cli.log_dir.clone(),
    };
    // Validation is deferred to commands that talk to the store.
    let config = AutopilotConfig::load_unvalidated(&config_path, &overrides)?;

    let _log_guard = init_logging(&config.logging)?;

    let context = AppContext {
        config,
        config_path,
        json: cli.json,
    };
    cli.command.run(context).await
}

fn init_logging(logging: &LoggingSettings) -> Result<Option<WorkerGuard>> {
    let default_filter = logging.filter.as_deref().unwrap_or("info");
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    let stderr = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    match &logging.dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log dir {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "autopilot.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let file = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);

            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .with(file)
                .try_init()
                .context("failed to install log subscriber")?;
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::registry()
                .with(filter)
                .with(stderr)
                .try_init()
                .context("failed to install log subscriber")?;
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use autopilot_router::ExecutionMode;
    use clap::{CommandFactory, Parser};

    use super::Cli;
    use crate::commands::{Commands, ModeCommands};

    #[test]
    fn command_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = match Cli::try_parse_from([
            "autopilot",
            "mode",
            "set",
            "canary",
            "--store-url",
            "http://127.0.0.1:7700",
            "--json",
        ]) {
            Ok(cli) => cli,
            Err(error) => panic!("parse failed: {error}"),
        };

        assert!(cli.json);
        assert_eq!(cli.store_url.as_deref(), Some("http://127.0.0.1:7700"));
        assert!(matches!(
            cli.command,
            Commands::Mode {
                command: ModeCommands::Set {
                    mode: ExecutionMode::Canary
                }
            }
        ));
    }

    #[test]
    fn rejects_unknown_mode() {
        assert!(Cli::try_parse_from(["autopilot", "mode", "set", "live"]).is_err());
    }

    #[test]
    fn ledger_key_requires_id_or_window() {
        assert!(Cli::try_parse_from(["autopilot", "ledger", "key", "gmail", "archive"]).is_err());
        assert!(
            Cli::try_parse_from([
                "autopilot", "ledger", "key", "gmail", "archive", "--window", "day"
            ])
            .is_ok()
        );
    }
}

use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use autopilot_ledger::Ledger;
use autopilot_router::Router;
use autopilot_store::{HttpStore, PersistentStore};
use clap::Subcommand;
use serde::Serialize;

use crate::config::AutopilotConfig;

mod kill_switch;
mod ledger;
mod mode;
mod route;
mod scope;
mod status;

pub use kill_switch::KillSwitchCommands;
pub use ledger::LedgerCommands;
pub use mode::ModeCommands;
pub use scope::ScopeCommands;

#[derive(Subcommand)]
pub enum Commands {
    /// Show mode, scope, kill switch and target health
    Status,
    /// Inspect or flip the emergency kill switch
    KillSwitch {
        #[command(subcommand)]
        command: KillSwitchCommands,
    },
    /// Dry-run the routing decision for a proposed action
    Route {
        /// Action title
        title: String,
        /// Why the action is proposed
        #[arg(long, default_value = "")]
        rationale: String,
        /// Skip keyword classification (e.g. open_resource, notification)
        #[arg(long)]
        category: Option<String>,
    },
    /// Move the rollout scope along test -> canary -> production
    Scope {
        #[command(subcommand)]
        command: ScopeCommands,
    },
    /// Change the execution mode
    Mode {
        #[command(subcommand)]
        command: ModeCommands,
    },
    /// Inspect and claim idempotency keys
    Ledger {
        #[command(subcommand)]
        command: LedgerCommands,
    },
}

impl Commands {
    pub async fn run(self, context: AppContext) -> Result<()> {
        match self {
            Commands::Status => status::run(&context).await,
            Commands::KillSwitch { command } => command.run(&context).await,
            Commands::Route {
                title,
                rationale,
                category,
            } => route::run(&context, title, rationale, category).await,
            Commands::Scope { command } => command.run(context),
            Commands::Mode { command } => command.run(context),
            Commands::Ledger { command } => command.run(&context).await,
        }
    }
}

pub struct AppContext {
    pub config: AutopilotConfig,
    pub config_path: PathBuf,
    pub json: bool,
}

impl AppContext {
    pub fn store(&self) -> Result<Arc<dyn PersistentStore>> {
        self.config.validate()?;
        let store = HttpStore::new(self.config.store_config())
            .context("failed to build persistent store client")?;
        Ok(Arc::new(store))
    }

    pub fn router(&self) -> Result<Router> {
        let store = self.store()?;
        Ok(Router::new(
            self.config.router_config(),
            store,
            Arc::new(self.config.target_registry()),
        ))
    }

    /// Must be called inside the runtime; the ledger spawns its background
    /// tasks on construction.
    pub fn ledger(&self) -> Result<Ledger> {
        let store = self.store()?;
        Ok(Ledger::new(self.config.ledger_config(), store))
    }

    /// Print `value` as JSON with `--json`, otherwise run `human`.
    pub fn emit<T: Serialize>(&self, value: &T, human: impl FnOnce(&T)) -> Result<()> {
        if self.json {
            let text =
                serde_json::to_string_pretty(value).context("failed to encode command output")?;
            println!("{text}");
        } else {
            human(value);
        }
        Ok(())
    }
}

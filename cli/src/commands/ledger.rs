use std::time::Duration;

use anyhow::{Context, Result, bail};
use autopilot_ledger::{
    Consistency, DedupeOutcome, LedgerEntry, RestoreReport, WindowGranularity, dedupe_key,
    time_window_key,
};
use clap::Subcommand;
use serde::Serialize;

use super::AppContext;

#[derive(Subcommand)]
pub enum LedgerCommands {
    /// Check whether a key has already been handled
    Check { key: String },
    /// Claim a key; fails the command if it was already claimed
    Claim {
        key: String,
        /// Entry lifetime (default from [ledger].default_ttl_secs)
        #[arg(long)]
        ttl_secs: Option<u64>,
        /// JSON metadata stored with the entry
        #[arg(long)]
        metadata: Option<String>,
    },
    /// Print the idempotency key for an action
    Key {
        source: String,
        action: String,
        /// Stable identifier of the thing acted on
        #[arg(long, conflicts_with = "window", required_unless_present = "window")]
        id: Option<String>,
        /// Bucket by time instead: hour, day or week (UTC)
        #[arg(long)]
        window: Option<WindowGranularity>,
    },
}

#[derive(Serialize)]
struct KeyCheck {
    key: String,
    is_duplicate: bool,
    entry: Option<LedgerEntry>,
    restore: RestoreReport,
}

impl LedgerCommands {
    pub async fn run(self, context: &AppContext) -> Result<()> {
        match self {
            LedgerCommands::Check { key } => {
                let ledger = context.ledger()?;
                let restore = ledger.restore().await;
                let check = KeyCheck {
                    is_duplicate: ledger.is_duplicate(&key),
                    entry: ledger.get(&key),
                    key,
                    restore,
                };
                ledger.destroy();
                context.emit(&check, print_check)
            }
            LedgerCommands::Claim {
                key,
                ttl_secs,
                metadata,
            } => {
                let metadata = metadata
                    .map(|raw| serde_json::from_str::<serde_json::Value>(&raw))
                    .transpose()
                    .context("--metadata must be valid JSON")?;

                let ledger = context.ledger()?;
                let outcome = ledger
                    .record_if_not_duplicate(&key, metadata, ttl_secs.map(Duration::from_secs))
                    .await;
                ledger.flush().await;
                ledger.destroy();

                context.emit(&outcome, |outcome| print_claim(&key, outcome))?;
                if outcome.is_duplicate {
                    bail!("{key} was already claimed");
                }
                Ok(())
            }
            LedgerCommands::Key {
                source,
                action,
                id,
                window,
            } => {
                let key = match (id, window) {
                    (Some(id), _) => dedupe_key(&source, &action, &id),
                    (None, Some(window)) => time_window_key(&source, &action, window),
                    (None, None) => bail!("either --id or --window is required"),
                };
                context.emit(&key, |key| println!("{key}"))
            }
        }
    }
}

fn print_check(check: &KeyCheck) {
    if let Some(error) = &check.restore.store_error {
        println!("warning: store unreachable, local view only ({error})");
    }
    match &check.entry {
        Some(entry) if check.is_duplicate => {
            println!("{}: handled at {}", check.key, entry.executed_at.to_rfc3339());
            if let Some(retry) = &entry.retry {
                println!("  retries: {} (last error: {})", retry.retry_count, retry.last_error);
            }
        }
        Some(entry) => println!(
            "{}: expired (handled at {})",
            check.key,
            entry.executed_at.to_rfc3339()
        ),
        None => println!("{}: not handled", check.key),
    }
}

fn print_claim(key: &str, outcome: &DedupeOutcome) {
    let via = match outcome.via {
        Consistency::Store => "store",
        Consistency::LocalFallback => "local fallback, not safe across processes",
    };
    if outcome.is_duplicate {
        println!("{key}: duplicate ({via})");
    } else {
        println!(
            "{key}: claimed as {} ({via})",
            outcome.id.as_deref().unwrap_or("-")
        );
    }
    if let Some(reason) = &outcome.reason {
        println!("  {reason}");
    }
}

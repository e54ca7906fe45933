use anyhow::{Context, Result};
use autopilot_router::{KillSwitchRecord, KillSwitchStatus};
use clap::Subcommand;

use super::AppContext;

#[derive(Subcommand)]
pub enum KillSwitchCommands {
    /// Read the current kill switch state from the store
    Status,
    /// Block all execution
    Enable {
        /// Why execution is being stopped
        #[arg(long)]
        reason: String,
        /// Operator name recorded in the audit trail
        #[arg(long, env = "USER", default_value = "operator")]
        by: String,
    },
    /// Allow execution again
    Disable {
        /// Operator name recorded in the audit trail
        #[arg(long, env = "USER", default_value = "operator")]
        by: String,
    },
}

impl KillSwitchCommands {
    pub async fn run(self, context: &AppContext) -> Result<()> {
        let router = context.router()?;
        match self {
            KillSwitchCommands::Status => {
                let status = router.check_kill_switch().await;
                context.emit(&status, print_status)
            }
            KillSwitchCommands::Enable { reason, by } => {
                let record = router
                    .enable_kill_switch(&reason, &by)
                    .await
                    .context("kill switch was NOT engaged")?;
                context.emit(&record, print_record)
            }
            KillSwitchCommands::Disable { by } => {
                let record = router
                    .disable_kill_switch(&by)
                    .await
                    .context("kill switch was NOT released")?;
                context.emit(&record, print_record)
            }
        }
    }
}

fn print_status(status: &KillSwitchStatus) {
    let state = if status.enabled { "ENGAGED" } else { "released" };
    println!("kill switch {state} (source: {:?})", status.source);
    if let Some(reason) = &status.reason {
        println!("reason: {reason}");
    }
    if let Some(at) = &status.disabled_at {
        println!("since:  {}", at.to_rfc3339());
    }
    if let Some(by) = &status.disabled_by {
        println!("by:     {by}");
    }
}

fn print_record(record: &KillSwitchRecord) {
    if record.enabled {
        println!(
            "kill switch engaged at {}: {}",
            record.timestamp.to_rfc3339(),
            record.reason.as_deref().unwrap_or("no reason given")
        );
    } else {
        println!("kill switch released at {}", record.timestamp.to_rfc3339());
    }
}

use anyhow::Result;
use autopilot_router::{KillSwitchSource, RouterStatus};

use super::AppContext;

pub async fn run(context: &AppContext) -> Result<()> {
    let router = context.router()?;
    let status = router.get_status().await;
    context.emit(&status, print_status)
}

fn print_status(status: &RouterStatus) {
    println!("mode:        {}", status.mode);
    println!("scope:       {}", status.scope);

    let kill = &status.kill_switch;
    let state = if kill.enabled { "ENGAGED" } else { "released" };
    let source = match kill.source {
        KillSwitchSource::Store => "confirmed",
        KillSwitchSource::Absent => "no record",
        KillSwitchSource::Unreachable => "assumed, store unreachable",
    };
    println!("kill switch: {state} ({source})");
    if let Some(reason) = &kill.reason {
        println!("  reason:    {reason}");
    }
    if let Some(by) = &kill.disabled_by {
        println!("  by:        {by}");
    }

    match (&status.registry, &status.registry_error) {
        (Some(health), _) => {
            println!(
                "targets:     {} total, {} online, {} offline",
                health.total, health.online, health.offline
            );
            for target in &health.targets {
                let capabilities = if target.capabilities.is_empty() {
                    "-".to_string()
                } else {
                    target.capabilities.join(", ")
                };
                println!("  {:<16} {:?}  {capabilities}", target.id, target.status);
            }
        }
        (None, Some(error)) => println!("targets:     unavailable ({error})"),
        (None, None) => println!("targets:     unavailable"),
    }
}

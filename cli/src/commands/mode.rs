use anyhow::Result;
use autopilot_router::ExecutionMode;
use clap::Subcommand;
use serde::Serialize;

use super::AppContext;

#[derive(Subcommand)]
pub enum ModeCommands {
    /// Set the execution mode: shadow, canary or production
    Set { mode: ExecutionMode },
}

#[derive(Serialize)]
struct ModeChange {
    from: ExecutionMode,
    to: ExecutionMode,
}

impl ModeCommands {
    pub fn run(self, mut context: AppContext) -> Result<()> {
        let ModeCommands::Set { mode } = self;
        let router = context.router()?;
        let from = router.set_mode(mode);

        context.config.router.mode = mode;
        context.config.save(&context.config_path)?;

        context.emit(&ModeChange { from, to: mode }, |change| {
            println!("mode {} -> {}", change.from, change.to);
        })
    }
}

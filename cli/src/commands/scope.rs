use anyhow::Result;
use autopilot_router::ScopeTransition;
use clap::Subcommand;

use super::AppContext;

#[derive(Subcommand)]
pub enum ScopeCommands {
    /// test -> canary -> production
    Promote,
    /// production -> canary -> test
    Rollback,
}

impl ScopeCommands {
    pub fn run(self, mut context: AppContext) -> Result<()> {
        let router = context.router()?;
        let transition = match self {
            ScopeCommands::Promote => router.promote_scope(),
            ScopeCommands::Rollback => router.rollback_scope(),
        };

        if transition.success {
            context.config.router.scope = transition.to;
            context.config.save(&context.config_path)?;
        }
        context.emit(&transition, print_transition)
    }
}

fn print_transition(transition: &ScopeTransition) {
    if transition.success {
        println!("scope {} -> {}", transition.from, transition.to);
    } else {
        println!("scope unchanged at {}", transition.from);
    }
}

use anyhow::{Result, anyhow};
use autopilot_router::{ActionCategory, ActionProposal, RoutingDecision};

use super::AppContext;

pub async fn run(
    context: &AppContext,
    title: String,
    rationale: String,
    category: Option<String>,
) -> Result<()> {
    let mut proposal = ActionProposal::new(title, rationale);
    if let Some(name) = category {
        let category = ActionCategory::parse(&name)
            .ok_or_else(|| anyhow!("unknown action category: {name}"))?;
        proposal = proposal.with_category(category);
    }

    let router = context.router()?;
    let decision = router.route(&proposal).await;
    context.emit(&decision, print_decision)
}

fn print_decision(decision: &RoutingDecision) {
    let verdict = if decision.should_execute {
        "EXECUTE"
    } else {
        "HOLD"
    };
    println!("{verdict}: {}", decision.reason);
    println!("mode/scope: {}/{}", decision.mode, decision.scope);
    if let Some(category) = decision.category {
        println!("category:   {category}");
    }
    if let Some(target) = &decision.target_device {
        println!("target:     {target}");
    }
    if let Some(stage) = decision.canary_rollout {
        println!("rollout:    {stage:?}");
    }
    if let Some(fallback) = &decision.fallback_message {
        println!("fallback:   {fallback}");
    }
}

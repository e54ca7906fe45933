//! Execution router.
//!
//! Decides, for one proposed action, whether it may execute now and where.
//! The kill switch overrides everything; the operating mode decides between
//! proposal-only, staged rollout and full execution; target routing maps the
//! proposal to an execution target through a [`TargetRegistry`].

mod classify;
mod error;
mod kill_switch;
mod registry;
mod router;
mod types;

pub use classify::{ActionCategory, CLASSIFICATION_RULES, ClassificationRule, classify};
pub use error::RouterError;
pub use kill_switch::{
    KILL_SWITCH_RECORD_TYPE, KillSwitch, KillSwitchFailurePolicy, KillSwitchRecord,
    KillSwitchSource, KillSwitchStatus,
};
pub use registry::{
    RegistryError, RegistryHealth, RouteEntry, StaticTargetRegistry, Target, TargetHealth,
    TargetLookup, TargetRegistry, TargetStatus,
};
pub use router::{
    DEFAULT_KILL_SWITCH_SCOPE, DEFAULT_TARGET, ResolvedTarget, Router, RouterConfig, RouterStatus,
};
pub use types::{
    ActionProposal, ExecutionConfig, ExecutionMode, ExecutionScope, ParseModeError, RolloutStage,
    RoutingDecision, ScopeTransition,
};

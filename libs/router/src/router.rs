use std::{
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use autopilot_store::{DEFAULT_CALL_TIMEOUT, PersistentStore};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    ActionCategory, ActionProposal, ExecutionConfig, ExecutionMode, ExecutionScope,
    KillSwitch, KillSwitchFailurePolicy, KillSwitchRecord, KillSwitchStatus, RegistryError,
    RegistryHealth, RolloutStage, RouterError, RoutingDecision, ScopeTransition, TargetLookup,
    TargetRegistry, TargetStatus, classify,
};

/// Target used when the registry has no mapping for a category.
pub const DEFAULT_TARGET: &str = "local";

pub const DEFAULT_KILL_SWITCH_SCOPE: &str = "autopilot/kill-switch";

#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub mode: ExecutionMode,
    pub scope: ExecutionScope,
    pub kill_switch_scope: String,
    pub kill_switch_policy: KillSwitchFailurePolicy,
    pub call_timeout: Duration,
    pub source_agent: String,
    pub default_target: String,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            scope: ExecutionScope::default(),
            kill_switch_scope: DEFAULT_KILL_SWITCH_SCOPE.to_string(),
            kill_switch_policy: KillSwitchFailurePolicy::default(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
            source_agent: "autopilot".to_string(),
            default_target: DEFAULT_TARGET.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTarget {
    pub category: ActionCategory,
    pub target: String,
    pub status: TargetStatus,
    /// Only set when the target is offline.
    pub fallback_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouterStatus {
    pub mode: ExecutionMode,
    pub scope: ExecutionScope,
    pub kill_switch: KillSwitchStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<RegistryHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_error: Option<String>,
}

pub struct Router {
    state: Mutex<ExecutionConfig>,
    kill_switch: KillSwitch,
    registry: Arc<dyn TargetRegistry>,
    default_target: String,
    call_timeout: Duration,
}

impl Router {
    pub fn new(
        config: RouterConfig,
        store: Arc<dyn PersistentStore>,
        registry: Arc<dyn TargetRegistry>,
    ) -> Self {
        let kill_switch = KillSwitch::new(
            store,
            config.kill_switch_scope,
            config.kill_switch_policy,
            config.call_timeout,
            config.source_agent,
        );
        Self {
            state: Mutex::new(ExecutionConfig {
                mode: config.mode,
                scope: config.scope,
                kill_switch_enabled: false,
            }),
            kill_switch,
            registry,
            default_target: config.default_target,
            call_timeout: config.call_timeout,
        }
    }

    pub fn execution_config(&self) -> ExecutionConfig {
        *lock(&self.state)
    }

    pub fn mode(&self) -> ExecutionMode {
        lock(&self.state).mode
    }

    pub fn scope(&self) -> ExecutionScope {
        lock(&self.state).scope
    }

    /// Returns the previous mode.
    pub fn set_mode(&self, mode: ExecutionMode) -> ExecutionMode {
        let mut state = lock(&self.state);
        let previous = std::mem::replace(&mut state.mode, mode);
        if previous != mode {
            info!(from = %previous, to = %mode, "execution mode changed");
        }
        previous
    }

    /// Returns the previous scope.
    pub fn set_scope(&self, scope: ExecutionScope) -> ExecutionScope {
        let mut state = lock(&self.state);
        let previous = std::mem::replace(&mut state.scope, scope);
        if previous != scope {
            info!(from = %previous, to = %scope, "execution scope changed");
        }
        previous
    }

    pub fn promote_scope(&self) -> ScopeTransition {
        self.transition(ExecutionScope::promoted, "promoted")
    }

    pub fn rollback_scope(&self) -> ScopeTransition {
        self.transition(ExecutionScope::rolled_back, "rolled back")
    }

    fn transition(
        &self,
        step: fn(ExecutionScope) -> Option<ExecutionScope>,
        verb: &str,
    ) -> ScopeTransition {
        let mut state = lock(&self.state);
        let from = state.scope;
        match step(from) {
            Some(to) => {
                state.scope = to;
                info!(from = %from, to = %to, "execution scope {verb}");
                ScopeTransition {
                    success: true,
                    from,
                    to,
                }
            }
            None => {
                debug!(scope = %from, "execution scope already at boundary");
                ScopeTransition {
                    success: false,
                    from,
                    to: from,
                }
            }
        }
    }

    pub async fn check_kill_switch(&self) -> KillSwitchStatus {
        let status = self.kill_switch.check().await;
        lock(&self.state).kill_switch_enabled = status.enabled;
        status
    }

    pub async fn enable_kill_switch(
        &self,
        reason: &str,
        who: &str,
    ) -> Result<KillSwitchRecord, RouterError> {
        let record = self.kill_switch.enable(reason, who).await?;
        lock(&self.state).kill_switch_enabled = true;
        warn!(reason, who, "kill switch engaged");
        Ok(record)
    }

    pub async fn disable_kill_switch(&self, who: &str) -> Result<KillSwitchRecord, RouterError> {
        let record = self.kill_switch.disable(who).await?;
        lock(&self.state).kill_switch_enabled = false;
        info!(who, "kill switch released");
        Ok(record)
    }

    pub async fn route(&self, proposal: &ActionProposal) -> RoutingDecision {
        let kill_switch = self.check_kill_switch().await;
        let ExecutionConfig { mode, scope, .. } = self.execution_config();

        if kill_switch.enabled {
            let reason = match kill_switch.reason {
                Some(reason) => format!("kill switch enabled: {reason}"),
                None => "kill switch enabled".to_string(),
            };
            info!(title = %proposal.title, %mode, "execution blocked by kill switch");
            return RoutingDecision {
                should_execute: false,
                reason,
                mode,
                scope,
                category: None,
                target_device: None,
                fallback_message: None,
                canary_rollout: None,
            };
        }

        let resolved = self.resolve_target(proposal).await;

        let (should_execute, reason, canary_rollout) = match mode {
            ExecutionMode::Shadow => (false, "shadow mode: proposal only".to_string(), None),
            ExecutionMode::Canary => {
                let stage = match scope {
                    ExecutionScope::Test => RolloutStage::Sandbox,
                    ExecutionScope::Canary => RolloutStage::Partial,
                    ExecutionScope::Production => RolloutStage::Full,
                };
                let reason = match stage {
                    RolloutStage::Sandbox => "canary mode: sandbox execution",
                    RolloutStage::Partial => "canary mode: partial rollout",
                    RolloutStage::Full => "canary mode: full rollout",
                };
                (true, reason.to_string(), Some(stage))
            }
            ExecutionMode::Production => (true, "production mode".to_string(), None),
        };

        debug!(
            title = %proposal.title,
            category = %resolved.category,
            target = %resolved.target,
            should_execute,
            "routed proposal"
        );

        RoutingDecision {
            should_execute,
            reason,
            mode,
            scope,
            category: Some(resolved.category),
            target_device: Some(resolved.target),
            fallback_message: resolved.fallback_message,
            canary_rollout,
        }
    }

    /// Classify the proposal and look its category up in the registry.
    pub async fn resolve_target(&self, proposal: &ActionProposal) -> ResolvedTarget {
        let category = proposal
            .category
            .unwrap_or_else(|| classify(&proposal.title, &proposal.rationale));

        let lookup = match tokio::time::timeout(self.call_timeout, self.registry.lookup(category))
            .await
            .unwrap_or(Err(RegistryError::Timeout(self.call_timeout)))
        {
            Ok(lookup) => lookup,
            Err(error) => {
                warn!(%category, error = %error, "target lookup failed; using default target");
                None
            }
        };

        match lookup {
            Some(TargetLookup {
                target,
                fallback_message,
            }) => {
                let fallback_message = match target.status {
                    TargetStatus::Offline => fallback_message,
                    TargetStatus::Online | TargetStatus::Unknown => None,
                };
                ResolvedTarget {
                    category,
                    target: target.id,
                    status: target.status,
                    fallback_message,
                }
            }
            None => ResolvedTarget {
                category,
                target: self.default_target.clone(),
                status: TargetStatus::Unknown,
                fallback_message: None,
            },
        }
    }

    /// Observational snapshot. Does not touch the cached kill-switch flag.
    pub async fn get_status(&self) -> RouterStatus {
        let kill_switch = self.kill_switch.check().await;
        let ExecutionConfig { mode, scope, .. } = self.execution_config();

        let (registry, registry_error) =
            match tokio::time::timeout(self.call_timeout, self.registry.health_summary())
                .await
                .unwrap_or(Err(RegistryError::Timeout(self.call_timeout)))
            {
                Ok(health) => (Some(health), None),
                Err(error) => {
                    warn!(error = %error, "target registry health unavailable");
                    (None, Some(error.to_string()))
                }
            };

        RouterStatus {
            mode,
            scope,
            kill_switch,
            registry,
            registry_error,
        }
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("state", &self.execution_config())
            .field("kill_switch", &self.kill_switch)
            .field("default_target", &self.default_target)
            .finish_non_exhaustive()
    }
}

fn lock(state: &Mutex<ExecutionConfig>) -> MutexGuard<'_, ExecutionConfig> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use autopilot_store::MemoryStore;

    use super::{Router, RouterConfig};
    use crate::{ExecutionMode, ExecutionScope, StaticTargetRegistry};

    fn router(scope: ExecutionScope) -> Router {
        Router::new(
            RouterConfig {
                scope,
                ..RouterConfig::default()
            },
            Arc::new(MemoryStore::new()),
            Arc::new(StaticTargetRegistry::default()),
        )
    }

    #[test]
    fn promote_walks_up_to_ceiling() {
        let router = router(ExecutionScope::Test);

        let first = router.promote_scope();
        assert!(first.success);
        assert_eq!((first.from, first.to), (ExecutionScope::Test, ExecutionScope::Canary));

        let second = router.promote_scope();
        assert_eq!(second.to, ExecutionScope::Production);

        let third = router.promote_scope();
        assert!(!third.success);
        assert_eq!(third.from, ExecutionScope::Production);
        assert_eq!(third.to, ExecutionScope::Production);
        assert_eq!(router.scope(), ExecutionScope::Production);
    }

    #[test]
    fn rollback_stops_at_floor() {
        let router = router(ExecutionScope::Canary);

        assert!(router.rollback_scope().success);
        let floor = router.rollback_scope();
        assert!(!floor.success);
        assert_eq!((floor.from, floor.to), (ExecutionScope::Test, ExecutionScope::Test));
    }

    #[test]
    fn set_mode_returns_previous() {
        let router = router(ExecutionScope::Test);

        assert_eq!(router.set_mode(ExecutionMode::Canary), ExecutionMode::Shadow);
        assert_eq!(router.mode(), ExecutionMode::Canary);
        assert_eq!(
            router.set_scope(ExecutionScope::Production),
            ExecutionScope::Test
        );
        assert_eq!(router.execution_config().scope, ExecutionScope::Production);
    }
}

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ActionCategory;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetStatus {
    Online,
    Offline,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub id: String,
    #[serde(default)]
    pub status: TargetStatus,
    #[serde(default)]
    pub capabilities: Vec<String>,
}

impl Target {
    pub fn new(id: impl Into<String>, status: TargetStatus) -> Self {
        Self {
            id: id.into(),
            status,
            capabilities: Vec::new(),
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetLookup {
    pub target: Target,
    /// Instruction for the caller when the target cannot take the action.
    pub fallback_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetHealth {
    pub id: String,
    pub status: TargetStatus,
    pub capabilities: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RegistryHealth {
    pub total: usize,
    pub online: usize,
    pub offline: usize,
    pub targets: Vec<TargetHealth>,
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("target registry unavailable: {0}")]
    Unavailable(String),
    #[error("target registry call exceeded deadline of {0:?}")]
    Timeout(std::time::Duration),
}

/// Maps action categories to execution targets.
#[async_trait]
pub trait TargetRegistry: Send + Sync + 'static {
    async fn lookup(&self, category: ActionCategory) -> Result<Option<TargetLookup>, RegistryError>;

    async fn health_summary(&self) -> Result<RegistryHealth, RegistryError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEntry {
    pub category: ActionCategory,
    pub target: String,
    #[serde(default)]
    pub fallback_message: Option<String>,
}

/// Registry built from configuration. Target status can be updated at
/// runtime, e.g. from a health probe.
#[derive(Debug, Default)]
pub struct StaticTargetRegistry {
    targets: RwLock<Vec<Target>>,
    routes: HashMap<ActionCategory, RouteEntry>,
}

impl StaticTargetRegistry {
    pub fn new(targets: Vec<Target>, routes: Vec<RouteEntry>) -> Self {
        let routes = routes
            .into_iter()
            .map(|route| (route.category, route))
            .collect();
        Self {
            targets: RwLock::new(targets),
            routes,
        }
    }

    /// Returns false when no target has that id.
    pub fn set_status(&self, id: &str, status: TargetStatus) -> bool {
        let mut targets = write(&self.targets);
        match targets.iter_mut().find(|target| target.id == id) {
            Some(target) => {
                target.status = status;
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl TargetRegistry for StaticTargetRegistry {
    async fn lookup(&self, category: ActionCategory) -> Result<Option<TargetLookup>, RegistryError> {
        let Some(route) = self.routes.get(&category) else {
            return Ok(None);
        };

        let target = read(&self.targets)
            .iter()
            .find(|target| target.id == route.target)
            .cloned()
            // A route may name a target that has not registered yet.
            .unwrap_or_else(|| Target::new(route.target.clone(), TargetStatus::Unknown));

        Ok(Some(TargetLookup {
            target,
            fallback_message: route.fallback_message.clone(),
        }))
    }

    async fn health_summary(&self) -> Result<RegistryHealth, RegistryError> {
        let targets = read(&self.targets);
        let mut health = RegistryHealth {
            total: targets.len(),
            ..RegistryHealth::default()
        };
        for target in targets.iter() {
            match target.status {
                TargetStatus::Online => health.online += 1,
                TargetStatus::Offline => health.offline += 1,
                TargetStatus::Unknown => {}
            }
            health.targets.push(TargetHealth {
                id: target.id.clone(),
                status: target.status,
                capabilities: target.capabilities.clone(),
            });
        }
        Ok(health)
    }
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::{RouteEntry, StaticTargetRegistry, Target, TargetRegistry, TargetStatus};
    use crate::ActionCategory;

    fn registry() -> StaticTargetRegistry {
        StaticTargetRegistry::new(
            vec![
                Target::new("mac-mini", TargetStatus::Online).with_capabilities(["open_url", "reveal"]),
                Target::new("phone", TargetStatus::Offline).with_capabilities(["notify"]),
                Target::new("spare", TargetStatus::Unknown),
            ],
            vec![
                RouteEntry {
                    category: ActionCategory::OpenResource,
                    target: "mac-mini".to_string(),
                    fallback_message: None,
                },
                RouteEntry {
                    category: ActionCategory::Notification,
                    target: "phone".to_string(),
                    fallback_message: Some("check the phone manually".to_string()),
                },
                RouteEntry {
                    category: ActionCategory::Automation,
                    target: "build-box".to_string(),
                    fallback_message: None,
                },
            ],
        )
    }

    #[tokio::test]
    async fn lookup_resolves_mapped_target() {
        let lookup = match registry().lookup(ActionCategory::Notification).await {
            Ok(Some(lookup)) => lookup,
            other => panic!("expected lookup, got {other:?}"),
        };

        assert_eq!(lookup.target.id, "phone");
        assert_eq!(lookup.target.status, TargetStatus::Offline);
        assert_eq!(
            lookup.fallback_message.as_deref(),
            Some("check the phone manually")
        );
    }

    #[tokio::test]
    async fn unmapped_category_is_none() {
        match registry().lookup(ActionCategory::Message).await {
            Ok(None) => {}
            other => panic!("expected no mapping, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn route_to_unregistered_target_has_unknown_status() {
        match registry().lookup(ActionCategory::Automation).await {
            Ok(Some(lookup)) => {
                assert_eq!(lookup.target.id, "build-box");
                assert_eq!(lookup.target.status, TargetStatus::Unknown);
            }
            other => panic!("expected lookup, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn health_summary_counts_status() {
        let registry = registry();
        assert!(registry.set_status("phone", TargetStatus::Online));
        assert!(!registry.set_status("missing", TargetStatus::Online));

        let health = match registry.health_summary().await {
            Ok(health) => health,
            Err(error) => panic!("health failed: {error}"),
        };
        assert_eq!(health.total, 3);
        assert_eq!(health.online, 2);
        assert_eq!(health.offline, 0);
        assert_eq!(health.targets[0].capabilities, vec!["open_url", "reveal"]);
    }
}

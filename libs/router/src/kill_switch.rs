use std::{sync::Arc, time::Duration};

use autopilot_store::{
    AppendOutcome, AppendRequest, PersistentStore, QueryRequest, StoreItem, with_deadline,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::RouterError;

pub const KILL_SWITCH_RECORD_TYPE: &str = "kill_switch";

/// What the router assumes when kill-switch state cannot be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchFailurePolicy {
    /// Treat unknown state as engaged and block execution.
    #[default]
    FailClosed,
    FailOpen,
}

/// Where a [`KillSwitchStatus`] value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KillSwitchSource {
    /// Confirmed by the latest stored record.
    Store,
    /// The store answered but holds no record.
    Absent,
    /// The store could not be read; `enabled` follows the failure policy.
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KillSwitchStatus {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<String>,
    pub source: KillSwitchSource,
}

impl KillSwitchStatus {
    fn absent() -> Self {
        Self {
            enabled: false,
            reason: None,
            disabled_at: None,
            disabled_by: None,
            source: KillSwitchSource::Absent,
        }
    }

    fn unreachable(policy: KillSwitchFailurePolicy, detail: &str) -> Self {
        Self {
            enabled: policy == KillSwitchFailurePolicy::FailClosed,
            reason: Some(format!("kill switch state unknown: {detail}")),
            disabled_at: None,
            disabled_by: None,
            source: KillSwitchSource::Unreachable,
        }
    }

    fn from_record(record: KillSwitchRecord) -> Self {
        if record.enabled {
            Self {
                enabled: true,
                reason: record.reason,
                disabled_at: Some(record.timestamp),
                disabled_by: record.disabled_by,
                source: KillSwitchSource::Store,
            }
        } else {
            Self {
                enabled: false,
                reason: record.reason,
                disabled_at: None,
                disabled_by: None,
                source: KillSwitchSource::Store,
            }
        }
    }
}

/// Stored payload of one kill-switch change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KillSwitchRecord {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Operator who engaged the switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<String>,
    /// Operator who released the switch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cleared_by: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Kill-switch reader and writer over the persistent store. Holds no cached
/// state; every check goes to the store.
pub struct KillSwitch {
    store: Arc<dyn PersistentStore>,
    scope: String,
    policy: KillSwitchFailurePolicy,
    call_timeout: Duration,
    source_agent: String,
    history_limit: usize,
}

impl KillSwitch {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        scope: impl Into<String>,
        policy: KillSwitchFailurePolicy,
        call_timeout: Duration,
        source_agent: impl Into<String>,
    ) -> Self {
        Self {
            store,
            scope: scope.into(),
            policy,
            call_timeout,
            source_agent: source_agent.into(),
            history_limit: 50,
        }
    }

    /// Reads the newest `history_limit` records. The store returns records
    /// newest first, so older history beyond the limit cannot win anyway.
    pub async fn check(&self) -> KillSwitchStatus {
        let request =
            QueryRequest::new(self.scope.clone(), KILL_SWITCH_RECORD_TYPE, self.history_limit);

        let items = match with_deadline(self.call_timeout, self.store.query(request)).await {
            Ok(items) => items,
            Err(error) => {
                warn!(
                    error = %error,
                    policy = ?self.policy,
                    "kill switch state unreadable; applying failure policy"
                );
                return KillSwitchStatus::unreachable(self.policy, &error.to_string());
            }
        };

        // The query matches by prefix; sibling scopes such as
        // `autopilot/kill-switch-staging` must not leak in.
        let items: Vec<&StoreItem> = items
            .iter()
            .filter(|item| item.scope.as_deref().is_none_or(|scope| scope == self.scope))
            .collect();

        if items.is_empty() {
            return KillSwitchStatus::absent();
        }

        // Ordered by record timestamp, then by the store's own write time.
        let mut latest: Option<(KillSwitchRecord, DateTime<Utc>)> = None;
        let mut malformed = 0usize;
        for item in items {
            match serde_json::from_str::<KillSwitchRecord>(&item.content) {
                Ok(record) => {
                    let newer = latest.as_ref().is_none_or(|(current, stored_at)| {
                        (record.timestamp, item.timestamp) > (current.timestamp, *stored_at)
                    });
                    if newer {
                        latest = Some((record, item.timestamp));
                    }
                }
                Err(error) => {
                    malformed += 1;
                    warn!(id = ?item.id, error = %error, "skipping malformed kill switch record");
                }
            }
        }

        match latest {
            Some((record, _)) => KillSwitchStatus::from_record(record),
            None => {
                warn!(
                    malformed,
                    policy = ?self.policy,
                    "no readable kill switch record; applying failure policy"
                );
                KillSwitchStatus::unreachable(self.policy, "stored records are unreadable")
            }
        }
    }

    pub async fn enable(&self, reason: &str, who: &str) -> Result<KillSwitchRecord, RouterError> {
        let record = KillSwitchRecord {
            enabled: true,
            reason: Some(reason.to_string()),
            disabled_by: Some(who.to_string()),
            cleared_by: None,
            timestamp: Utc::now(),
        };
        self.write(record, format!("kill switch enabled by {who}")).await
    }

    pub async fn disable(&self, who: &str) -> Result<KillSwitchRecord, RouterError> {
        let record = KillSwitchRecord {
            enabled: false,
            reason: None,
            disabled_by: None,
            cleared_by: Some(who.to_string()),
            timestamp: Utc::now(),
        };
        self.write(record, format!("kill switch cleared by {who}")).await
    }

    async fn write(
        &self,
        record: KillSwitchRecord,
        title: String,
    ) -> Result<KillSwitchRecord, RouterError> {
        let request = AppendRequest {
            scope: self.scope.clone(),
            dedupe_key: None,
            kind: KILL_SWITCH_RECORD_TYPE.to_string(),
            title,
            content: serde_json::to_string(&record)?,
            tags: vec!["kill-switch".to_string(), "audit".to_string()],
            importance: 5,
            source_agent: self.source_agent.clone(),
        };

        match with_deadline(self.call_timeout, self.store.append(request)).await {
            Ok(AppendOutcome::Created { id } | AppendOutcome::Updated { id }) => {
                info!(id = ?id, enabled = record.enabled, "kill switch record written");
                Ok(record)
            }
            Ok(AppendOutcome::Conflict) => Err(RouterError::KillSwitchRejected),
            Err(error) => Err(RouterError::KillSwitchWrite(error)),
        }
    }
}

impl std::fmt::Debug for KillSwitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KillSwitch")
            .field("scope", &self.scope)
            .field("policy", &self.policy)
            .field("call_timeout", &self.call_timeout)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use autopilot_store::{AppendRequest, MemoryStore};
    use chrono::{TimeDelta, Utc};

    use super::{
        KILL_SWITCH_RECORD_TYPE, KillSwitch, KillSwitchFailurePolicy, KillSwitchRecord,
        KillSwitchSource,
    };
    use crate::RouterError;

    const SCOPE: &str = "autopilot/kill-switch";

    fn switch(store: Arc<MemoryStore>, policy: KillSwitchFailurePolicy) -> KillSwitch {
        KillSwitch::new(store, SCOPE, policy, Duration::from_millis(200), "test")
    }

    fn raw(content: String) -> AppendRequest {
        raw_in(SCOPE, content)
    }

    fn raw_in(scope: &str, content: String) -> AppendRequest {
        AppendRequest {
            scope: scope.to_string(),
            dedupe_key: None,
            kind: KILL_SWITCH_RECORD_TYPE.to_string(),
            title: "seed".to_string(),
            content,
            tags: Vec::new(),
            importance: 5,
            source_agent: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn absent_record_is_released() {
        let store = Arc::new(MemoryStore::new());
        let status = switch(store, KillSwitchFailurePolicy::FailClosed)
            .check()
            .await;

        assert!(!status.enabled);
        assert_eq!(status.source, KillSwitchSource::Absent);
    }

    #[tokio::test]
    async fn enable_then_check_reports_operator() {
        let store = Arc::new(MemoryStore::new());
        let kill = switch(store, KillSwitchFailurePolicy::FailClosed);

        if let Err(error) = kill.enable("runaway sends", "ops@example").await {
            panic!("enable failed: {error}");
        }
        let status = kill.check().await;

        assert!(status.enabled);
        assert_eq!(status.source, KillSwitchSource::Store);
        assert_eq!(status.reason.as_deref(), Some("runaway sends"));
        assert_eq!(status.disabled_by.as_deref(), Some("ops@example"));
        assert!(status.disabled_at.is_some());
    }

    #[tokio::test]
    async fn latest_record_wins() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        let older = KillSwitchRecord {
            enabled: false,
            reason: None,
            disabled_by: None,
            cleared_by: Some("ops".to_string()),
            timestamp: now - TimeDelta::minutes(5),
        };
        let newer = KillSwitchRecord {
            enabled: true,
            reason: Some("incident".to_string()),
            disabled_by: Some("ops".to_string()),
            cleared_by: None,
            timestamp: now,
        };
        // Insertion order deliberately disagrees with record timestamps.
        for record in [&newer, &older] {
            match serde_json::to_string(record) {
                Ok(content) => store.insert_raw(raw(content), Utc::now()),
                Err(error) => panic!("encode failed: {error}"),
            }
        }

        let status = switch(store, KillSwitchFailurePolicy::FailClosed)
            .check()
            .await;
        assert!(status.enabled);
        assert_eq!(status.reason.as_deref(), Some("incident"));
    }

    fn encode(record: &KillSwitchRecord) -> String {
        match serde_json::to_string(record) {
            Ok(content) => content,
            Err(error) => panic!("encode failed: {error}"),
        }
    }

    fn engaged(timestamp: chrono::DateTime<Utc>) -> KillSwitchRecord {
        KillSwitchRecord {
            enabled: true,
            reason: Some("incident".to_string()),
            disabled_by: Some("ops".to_string()),
            cleared_by: None,
            timestamp,
        }
    }

    fn released(timestamp: chrono::DateTime<Utc>) -> KillSwitchRecord {
        KillSwitchRecord {
            enabled: false,
            reason: None,
            disabled_by: None,
            cleared_by: Some("ops".to_string()),
            timestamp,
        }
    }

    #[tokio::test]
    async fn sibling_scope_does_not_engage_switch() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(
            raw_in("autopilot/kill-switch-staging", encode(&engaged(Utc::now()))),
            Utc::now(),
        );

        let status = switch(store, KillSwitchFailurePolicy::FailClosed)
            .check()
            .await;
        assert!(!status.enabled);
        assert_eq!(status.source, KillSwitchSource::Absent);
    }

    #[tokio::test]
    async fn sibling_scope_does_not_release_switch() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_raw(raw(encode(&engaged(now - TimeDelta::minutes(5)))), now);
        store.insert_raw(
            raw_in("autopilot/kill-switch-staging", encode(&released(now))),
            now,
        );

        let status = switch(store, KillSwitchFailurePolicy::FailClosed)
            .check()
            .await;
        assert!(status.enabled);
        assert_eq!(status.source, KillSwitchSource::Store);
    }

    #[tokio::test]
    async fn equal_record_times_fall_back_to_store_time() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        // Same client timestamp; the release was stored later.
        store.insert_raw(raw(encode(&released(now))), now + TimeDelta::seconds(1));
        store.insert_raw(raw(encode(&engaged(now))), now);

        let status = switch(store, KillSwitchFailurePolicy::FailClosed)
            .check()
            .await;
        assert!(!status.enabled);
        assert_eq!(status.source, KillSwitchSource::Store);
    }

    #[tokio::test]
    async fn unreachable_store_follows_policy() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);

        let closed = switch(store.clone(), KillSwitchFailurePolicy::FailClosed)
            .check()
            .await;
        assert!(closed.enabled);
        assert_eq!(closed.source, KillSwitchSource::Unreachable);

        let open = switch(store, KillSwitchFailurePolicy::FailOpen)
            .check()
            .await;
        assert!(!open.enabled);
        assert_eq!(open.source, KillSwitchSource::Unreachable);
    }

    #[tokio::test]
    async fn unreadable_records_follow_policy() {
        let store = Arc::new(MemoryStore::new());
        store.insert_raw(raw("not json".to_string()), Utc::now());

        let status = switch(store, KillSwitchFailurePolicy::FailClosed)
            .check()
            .await;
        assert!(status.enabled);
        assert_eq!(status.source, KillSwitchSource::Unreachable);
    }

    #[tokio::test]
    async fn failed_write_is_an_error() {
        let store = Arc::new(MemoryStore::new());
        store.set_available(false);
        let kill = switch(store, KillSwitchFailurePolicy::FailClosed);

        match kill.enable("incident", "ops").await {
            Err(RouterError::KillSwitchWrite(_)) => {}
            other => panic!("expected write error, got {other:?}"),
        }
        match kill.disable("ops").await {
            Err(RouterError::KillSwitchWrite(_)) => {}
            other => panic!("expected write error, got {other:?}"),
        }
    }

    #[test]
    fn record_uses_camel_case() {
        let record = KillSwitchRecord {
            enabled: true,
            reason: Some("incident".to_string()),
            disabled_by: Some("ops".to_string()),
            cleared_by: None,
            timestamp: Utc::now(),
        };
        let json = match serde_json::to_value(&record) {
            Ok(json) => json,
            Err(error) => panic!("encode failed: {error}"),
        };

        assert_eq!(json["disabledBy"], "ops");
        assert!(json.get("clearedBy").is_none());
        assert!(json.get("timestamp").is_some());
    }
}

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LedgerEntry {
    /// Time-ordered UUIDv7, so ids sort by creation.
    pub id: String,
    pub dedupe_key: String,
    pub executed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    pub ttl_ms: u64,
    /// Present once a failure has been recorded for this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryState>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryState {
    pub retry_count: u32,
    pub last_error: String,
    /// `None` once retries are exhausted.
    pub next_retry_at: Option<DateTime<Utc>>,
}

impl LedgerEntry {
    pub fn new(
        dedupe_key: impl Into<String>,
        metadata: Option<serde_json::Value>,
        ttl: Duration,
    ) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            dedupe_key: dedupe_key.into(),
            executed_at: Utc::now(),
            metadata,
            ttl_ms: u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX),
            retry: None,
        }
    }

    /// Live iff `now - executed_at <= ttl`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        let age_ms = (now - self.executed_at).num_milliseconds();
        match i64::try_from(self.ttl_ms) {
            Ok(ttl_ms) => age_ms <= ttl_ms,
            Err(_) => true,
        }
    }

    pub fn is_live(&self) -> bool {
        self.is_live_at(Utc::now())
    }

    pub fn retry_count(&self) -> u32 {
        self.retry.as_ref().map_or(0, |retry| retry.retry_count)
    }
}

use std::{
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{AppendOutcome, AppendRequest, PersistentStore, QueryRequest, StoreError, StoreItem};

/// How the in-memory store reports an append whose dedupe key already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateSignal {
    #[default]
    Conflict,
    /// Overwrite the existing record and report `Updated`.
    Updated,
}

#[derive(Debug, Clone)]
struct Record {
    id: String,
    request: AppendRequest,
    timestamp: DateTime<Utc>,
}

/// In-process [`PersistentStore`] used by tests and local runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<Record>>,
    duplicate_signal: DuplicateSignal,
    retention: Option<Duration>,
    unavailable: AtomicBool,
    latency: Mutex<Option<Duration>>,
    next_id: AtomicU64,
    appends: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_duplicate_signal(mut self, signal: DuplicateSignal) -> Self {
        self.duplicate_signal = signal;
        self
    }

    /// Records older than `retention` are treated as gone.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn set_available(&self, available: bool) {
        self.unavailable.store(!available, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Number of append calls that reached the store, including rejected ones.
    pub fn append_count(&self) -> u64 {
        self.appends.load(Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        lock(&self.records).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Seed a raw record, bypassing dedupe checks.
    pub fn insert_raw(&self, request: AppendRequest, timestamp: DateTime<Utc>) {
        let id = self.allocate_id();
        lock(&self.records).push(Record {
            id,
            request,
            timestamp,
        });
    }

    fn allocate_id(&self) -> String {
        format!("mem-{}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1)
    }

    async fn simulate_network(&self) -> Result<(), StoreError> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn evict_expired(&self, records: &mut Vec<Record>, now: DateTime<Utc>) {
        if let Some(retention) = self.retention {
            let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
            records.retain(|record| now - record.timestamp <= retention);
        }
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
    async fn append(&self, request: AppendRequest) -> Result<AppendOutcome, StoreError> {
        self.simulate_network().await?;
        self.appends.fetch_add(1, Ordering::SeqCst);

        let now = Utc::now();
        let mut records = lock(&self.records);
        self.evict_expired(&mut records, now);

        if let Some(key) = request.dedupe_key.as_deref() {
            let existing = records.iter_mut().find(|record| {
                record.request.scope == request.scope
                    && record.request.dedupe_key.as_deref() == Some(key)
            });
            if let Some(existing) = existing {
                return Ok(match self.duplicate_signal {
                    DuplicateSignal::Conflict => AppendOutcome::Conflict,
                    DuplicateSignal::Updated => {
                        existing.request = request;
                        existing.timestamp = now;
                        AppendOutcome::Updated {
                            id: Some(existing.id.clone()),
                        }
                    }
                });
            }
        }

        let id = self.allocate_id();
        records.push(Record {
            id: id.clone(),
            request,
            timestamp: now,
        });
        Ok(AppendOutcome::Created { id: Some(id) })
    }

    async fn query(&self, request: QueryRequest) -> Result<Vec<StoreItem>, StoreError> {
        self.simulate_network().await?;

        let mut records = lock(&self.records);
        self.evict_expired(&mut records, Utc::now());

        let mut items: Vec<StoreItem> = records
            .iter()
            .filter(|record| record.request.scope.starts_with(&request.scope_prefix))
            .filter(|record| match request.kind.as_deref() {
                Some(kind) => record.request.kind == kind,
                None => true,
            })
            .map(|record| StoreItem {
                id: Some(record.id.clone()),
                scope: Some(record.request.scope.clone()),
                dedupe_key: record.request.dedupe_key.clone(),
                kind: Some(record.request.kind.clone()),
                content: record.request.content.clone(),
                timestamp: record.timestamp,
            })
            .collect();

        items.sort_by(|lhs, rhs| rhs.timestamp.cmp(&lhs.timestamp));
        items.truncate(request.limit);
        Ok(items)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::{DuplicateSignal, MemoryStore};
    use crate::{AppendOutcome, AppendRequest, PersistentStore, QueryRequest, StoreError};

    fn request(scope: &str, key: Option<&str>, content: &str) -> AppendRequest {
        AppendRequest {
            scope: scope.to_string(),
            dedupe_key: key.map(str::to_string),
            kind: "dedupe".to_string(),
            title: key.unwrap_or("untitled").to_string(),
            content: content.to_string(),
            tags: Vec::new(),
            importance: 3,
            source_agent: "test".to_string(),
        }
    }

    #[tokio::test]
    async fn second_append_with_same_key_conflicts() {
        let store = MemoryStore::new();

        let first = store.append(request("ns", Some("k"), "1")).await;
        let second = store.append(request("ns", Some("k"), "2")).await;

        assert!(matches!(first, Ok(AppendOutcome::Created { .. })));
        assert!(matches!(second, Ok(AppendOutcome::Conflict)));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn updated_signal_overwrites_content() {
        let store = MemoryStore::new().with_duplicate_signal(DuplicateSignal::Updated);

        let _ = store.append(request("ns", Some("k"), "old")).await;
        let second = store.append(request("ns", Some("k"), "new")).await;
        assert!(matches!(second, Ok(AppendOutcome::Updated { .. })));

        let items = match store.query(QueryRequest::new("ns", "dedupe", 10)).await {
            Ok(items) => items,
            Err(error) => panic!("query failed: {error}"),
        };
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].content, "new");
    }

    #[tokio::test]
    async fn same_key_in_other_scope_is_independent() {
        let store = MemoryStore::new();

        let _ = store.append(request("ns-a", Some("k"), "1")).await;
        let other = store.append(request("ns-b", Some("k"), "1")).await;

        assert!(matches!(other, Ok(AppendOutcome::Created { .. })));
    }

    #[tokio::test]
    async fn unavailable_store_rejects_calls() {
        let store = MemoryStore::new();
        store.set_available(false);

        let result = store.append(request("ns", Some("k"), "1")).await;
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.append_count(), 0);
    }

    #[tokio::test]
    async fn retention_expires_records() {
        let store = MemoryStore::new().with_retention(Duration::from_millis(30));

        let _ = store.append(request("ns", Some("k"), "1")).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        let again = store.append(request("ns", Some("k"), "1")).await;

        assert!(matches!(again, Ok(AppendOutcome::Created { .. })));
    }

    #[tokio::test]
    async fn query_filters_prefix_and_limits() {
        let store = MemoryStore::new();
        for index in 0..5 {
            let key = format!("k{index}");
            let _ = store
                .append(request("autopilot/ledger", Some(&key), "{}"))
                .await;
        }
        let _ = store.append(request("other", Some("x"), "{}")).await;

        let items = match store
            .query(QueryRequest::new("autopilot/", "dedupe", 3))
            .await
        {
            Ok(items) => items,
            Err(error) => panic!("query failed: {error}"),
        };
        assert_eq!(items.len(), 3);
        assert!(
            items
                .iter()
                .all(|item| item.scope.as_deref() == Some("autopilot/ledger"))
        );
    }
}

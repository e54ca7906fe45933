use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use autopilot_store::{AppendRequest, PersistentStore, QueryRequest, StoreError, with_deadline};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{LEDGER_RECORD_TYPE, LedgerConfig, LedgerEntry, RetryDecision, RetryState};

/// Which path produced a dedupe answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Consistency {
    /// The store enforced uniqueness; safe across processes.
    Store,
    /// The store was unreachable and only this process's cache was consulted.
    LocalFallback,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DedupeOutcome {
    pub is_duplicate: bool,
    pub recorded: bool,
    pub id: Option<String>,
    pub reason: Option<String>,
    pub via: Consistency,
}

impl DedupeOutcome {
    fn duplicate(via: Consistency, reason: impl Into<String>) -> Self {
        Self {
            is_duplicate: true,
            recorded: false,
            id: None,
            reason: Some(reason.into()),
            via,
        }
    }

    fn recorded(id: String, via: Consistency, reason: Option<String>) -> Self {
        Self {
            is_duplicate: false,
            recorded: true,
            id: Some(id),
            reason,
            via,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RestoreReport {
    pub fetched: usize,
    pub restored: usize,
    pub expired: usize,
    pub malformed: usize,
    /// Set when the store could not be queried; the cache is left untouched.
    pub store_error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub store_fallbacks: u64,
    pub mirror_failures: u64,
    pub duplicates_detected: u64,
    pub swept: u64,
}

#[derive(Default)]
struct Counters {
    store_fallbacks: AtomicU64,
    mirror_failures: AtomicU64,
    duplicates_detected: AtomicU64,
    swept: AtomicU64,
}

#[derive(Default)]
struct LedgerState {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    /// Keys held locally that the store has not acknowledged yet.
    unsynced: Mutex<HashSet<String>>,
    counters: Counters,
}

impl LedgerState {
    fn entries(&self) -> MutexGuard<'_, HashMap<String, LedgerEntry>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn unsynced(&self) -> MutexGuard<'_, HashSet<String>> {
        self.unsynced
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn live_entry(&self, key: &str, now: DateTime<Utc>) -> Option<LedgerEntry> {
        self.entries()
            .get(key)
            .filter(|entry| entry.is_live_at(now))
            .cloned()
    }

    fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_live_at(now));
        let removed = before - entries.len();
        self.counters
            .swept
            .fetch_add(removed as u64, Ordering::Relaxed);
        removed
    }
}

enum MirrorCommand {
    Write(LedgerEntry),
    Flush(oneshot::Sender<()>),
}

/// Idempotency ledger backed by a local cache and a persistent store.
///
/// Construction spawns two background tasks, so it must happen inside a Tokio
/// runtime: a writer that mirrors [`Ledger::record`] calls to the store, and an
/// hourly sweep that evicts expired entries from the cache.
pub struct Ledger {
    config: LedgerConfig,
    store: Arc<dyn PersistentStore>,
    state: Arc<LedgerState>,
    mirror_tx: mpsc::UnboundedSender<MirrorCommand>,
    sweep_cancel: CancellationToken,
    sweep_task: Mutex<Option<JoinHandle<()>>>,
}

impl Ledger {
    pub fn new(config: LedgerConfig, store: Arc<dyn PersistentStore>) -> Self {
        let state = Arc::new(LedgerState::default());
        let (mirror_tx, mirror_rx) = mpsc::unbounded_channel();

        tokio::spawn(run_mirror_writer(
            config.clone(),
            store.clone(),
            state.clone(),
            mirror_rx,
        ));

        let sweep_cancel = CancellationToken::new();
        let sweep_task = tokio::spawn(run_sweeper(
            state.clone(),
            config.sweep_interval,
            sweep_cancel.clone(),
        ));

        Self {
            config,
            store,
            state,
            mirror_tx,
            sweep_cancel,
            sweep_task: Mutex::new(Some(sweep_task)),
        }
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Write an entry unconditionally, replacing any entry for `key`.
    ///
    /// The store mirror is queued on the background writer; its failure is
    /// logged and counted but never surfaces here.
    pub fn record(
        &self,
        key: &str,
        metadata: Option<serde_json::Value>,
        ttl: Option<Duration>,
    ) -> String {
        let entry = LedgerEntry::new(key, metadata, ttl.unwrap_or(self.config.default_ttl));
        let id = entry.id.clone();

        self.state.entries().insert(key.to_string(), entry.clone());

        self.queue_mirror(entry);
        id
    }

    fn queue_mirror(&self, entry: LedgerEntry) {
        let key = entry.dedupe_key.clone();
        if self.mirror_tx.send(MirrorCommand::Write(entry)).is_err() {
            self.state
                .counters
                .mirror_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!(key = %key, "ledger mirror writer stopped; entry kept in local cache only");
        }
    }

    /// Re-queue entries whose mirror write never reached the store. Runs
    /// whenever the store answers again after an outage.
    fn replay_unsynced(&self) {
        let keys: Vec<String> = self.state.unsynced().drain().collect();
        if keys.is_empty() {
            return;
        }

        let now = Utc::now();
        let mut replayed = 0usize;
        for key in keys {
            if let Some(entry) = self.state.live_entry(&key, now) {
                self.queue_mirror(entry);
                replayed += 1;
            }
        }
        if replayed > 0 {
            info!(replayed, "store reachable again; replaying locally held ledger entries");
        }
    }

    /// Atomically claim `key`.
    ///
    /// With a reachable store, uniqueness is enforced by the store and holds
    /// across processes. When the store cannot be reached the claim falls back
    /// to the local cache, which only protects against callers in this
    /// process; the outcome reports this through [`Consistency::LocalFallback`].
    pub async fn record_if_not_duplicate(
        &self,
        key: &str,
        metadata: Option<serde_json::Value>,
        ttl: Option<Duration>,
    ) -> DedupeOutcome {
        let entry = LedgerEntry::new(key, metadata, ttl.unwrap_or(self.config.default_ttl));

        let request = match append_request(&self.config, &entry) {
            Ok(request) => request,
            Err(error) => {
                warn!(key = %key, error = %error, "failed to encode ledger entry; using local cache");
                return self.claim_locally(entry, format!("entry encoding failed: {error}"));
            }
        };

        match with_deadline(self.config.call_timeout, self.store.append(request)).await {
            Ok(outcome) if outcome.is_duplicate() => {
                self.state
                    .counters
                    .duplicates_detected
                    .fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "store reported existing entry");
                self.state.unsynced().remove(key);
                self.replay_unsynced();
                DedupeOutcome::duplicate(Consistency::Store, "entry already exists in store")
            }
            Ok(_) => {
                // A claim taken during an outage is still live here even though
                // the store has never seen it.
                let outcome = {
                    let mut entries = self.state.entries();
                    if entries
                        .get(key)
                        .is_some_and(|existing| existing.is_live_at(Utc::now()))
                    {
                        None
                    } else {
                        let id = entry.id.clone();
                        entries.insert(key.to_string(), entry);
                        Some(DedupeOutcome::recorded(id, Consistency::Store, None))
                    }
                };
                self.state.unsynced().remove(key);
                self.replay_unsynced();

                match outcome {
                    Some(outcome) => outcome,
                    None => {
                        self.state
                            .counters
                            .duplicates_detected
                            .fetch_add(1, Ordering::Relaxed);
                        debug!(key = %key, "store accepted key already held in local cache");
                        DedupeOutcome::duplicate(
                            Consistency::Store,
                            "live entry in local cache, claimed while the store was unreachable",
                        )
                    }
                }
            }
            Err(error) => {
                self.state
                    .counters
                    .store_fallbacks
                    .fetch_add(1, Ordering::Relaxed);
                warn!(
                    key = %key,
                    error = %error,
                    timeout = matches!(error, StoreError::Timeout(_)),
                    "store unreachable; dedupe degraded to local cache without cross-process atomicity"
                );
                self.claim_locally(entry, format!("store unreachable: {error}"))
            }
        }
    }

    fn claim_locally(&self, entry: LedgerEntry, reason: String) -> DedupeOutcome {
        let now = Utc::now();
        {
            let mut entries = self.state.entries();
            if entries
                .get(&entry.dedupe_key)
                .is_some_and(|existing| existing.is_live_at(now))
            {
                self.state
                    .counters
                    .duplicates_detected
                    .fetch_add(1, Ordering::Relaxed);
                return DedupeOutcome::duplicate(
                    Consistency::LocalFallback,
                    format!("live entry in local cache ({reason})"),
                );
            }
            entries.insert(entry.dedupe_key.clone(), entry.clone());
        }

        let id = entry.id.clone();
        self.state.unsynced().insert(entry.dedupe_key.clone());
        self.queue_mirror(entry);
        DedupeOutcome::recorded(id, Consistency::LocalFallback, Some(reason))
    }

    /// Local-only liveness check.
    ///
    /// Checking and then recording is racy; use
    /// [`Ledger::record_if_not_duplicate`] to claim a key. This stays for
    /// read-only status queries.
    pub fn is_duplicate(&self, key: &str) -> bool {
        self.state
            .entries()
            .get(key)
            .is_some_and(LedgerEntry::is_live)
    }

    pub fn get(&self, key: &str) -> Option<LedgerEntry> {
        self.state.entries().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> bool {
        self.state.entries().remove(key).is_some()
    }

    pub fn clear(&self) {
        self.state.entries().clear();
    }

    pub fn get_all(&self) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self.state.entries().values().cloned().collect();
        entries.sort_by(|lhs, rhs| lhs.id.cmp(&rhs.id));
        entries
    }

    pub fn size(&self) -> usize {
        self.state.entries().len()
    }

    /// Re-hydrate the cache from the store after a restart.
    ///
    /// Live entries are loaded; expired and unparseable ones are skipped
    /// individually. A local entry newer than the stored one wins.
    pub async fn restore(&self) -> RestoreReport {
        let request = QueryRequest::new(
            self.config.namespace.clone(),
            LEDGER_RECORD_TYPE,
            self.config.restore_limit,
        );

        let items = match with_deadline(self.config.call_timeout, self.store.query(request)).await
        {
            Ok(items) => items,
            Err(error) => {
                self.state
                    .counters
                    .store_fallbacks
                    .fetch_add(1, Ordering::Relaxed);
                warn!(error = %error, "ledger restore skipped; store unreachable");
                return RestoreReport {
                    store_error: Some(error.to_string()),
                    ..RestoreReport::default()
                };
            }
        };

        self.replay_unsynced();

        let now = Utc::now();
        let mut report = RestoreReport {
            fetched: items.len(),
            ..RestoreReport::default()
        };
        let mut entries = self.state.entries();

        for item in items {
            let entry: LedgerEntry = match serde_json::from_str(&item.content) {
                Ok(entry) => entry,
                Err(error) => {
                    report.malformed += 1;
                    warn!(
                        item_id = ?item.id,
                        error = %error,
                        "skipping malformed ledger entry during restore"
                    );
                    continue;
                }
            };

            if !entry.is_live_at(now) {
                report.expired += 1;
                continue;
            }

            let keep_local = entries
                .get(&entry.dedupe_key)
                .is_some_and(|local| local.executed_at >= entry.executed_at);
            if !keep_local {
                entries.insert(entry.dedupe_key.clone(), entry);
                report.restored += 1;
            }
        }

        info!(
            fetched = report.fetched,
            restored = report.restored,
            expired = report.expired,
            malformed = report.malformed,
            "Ledger restore complete"
        );

        report
    }

    /// Record a failed attempt for `key`, creating the entry if needed.
    ///
    /// Retries are allowed while the failure count stays within
    /// `max_retries`; the failure after that is terminal and clears
    /// `next_retry_at`.
    pub fn record_failure(
        &self,
        key: &str,
        error: &str,
        metadata: Option<serde_json::Value>,
    ) -> RetryDecision {
        let policy = self.config.retry;
        let now = Utc::now();
        let mut entries = self.state.entries();

        let entry = entries
            .entry(key.to_string())
            .and_modify(|existing| {
                if !existing.is_live_at(now) {
                    *existing = LedgerEntry::new(key, None, self.config.default_ttl);
                }
            })
            .or_insert_with(|| LedgerEntry::new(key, None, self.config.default_ttl));
        if metadata.is_some() {
            entry.metadata = metadata;
        }

        let previous = entry.retry_count();
        let retry_count = previous.saturating_add(1);

        if retry_count > policy.max_retries {
            entry.retry = Some(RetryState {
                retry_count,
                last_error: error.to_string(),
                next_retry_at: None,
            });
            warn!(key = %key, retry_count, error = %error, "retries exhausted");
            return RetryDecision::exhausted();
        }

        let delay = policy.delay_for(previous);
        let next_retry_at = chrono::Duration::from_std(delay)
            .ok()
            .and_then(|delay| now.checked_add_signed(delay));

        entry.retry = Some(RetryState {
            retry_count,
            last_error: error.to_string(),
            next_retry_at,
        });
        debug!(key = %key, retry_count, delay_ms = delay.as_millis() as u64, "retry scheduled");

        RetryDecision::retry_after(delay)
    }

    /// Expired entries read as absent until the sweep evicts them.
    pub fn is_ready_for_retry(&self, key: &str) -> bool {
        let now = Utc::now();
        self.state
            .live_entry(key, now)
            .and_then(|entry| entry.retry)
            .and_then(|retry| retry.next_retry_at)
            .is_some_and(|next| now >= next)
    }

    pub fn get_retry_count(&self, key: &str) -> u32 {
        self.state
            .live_entry(key, Utc::now())
            .map_or(0, |entry| entry.retry_count())
    }

    /// Clear retry bookkeeping after an eventual success. Returns whether a
    /// live entry was known for the key.
    pub fn reset_retry_count(&self, key: &str) -> bool {
        let now = Utc::now();
        match self.state.entries().get_mut(key) {
            Some(entry) if entry.is_live_at(now) => {
                entry.retry = None;
                true
            }
            _ => false,
        }
    }

    /// Evict expired entries now rather than waiting for the sweep.
    pub fn sweep_expired(&self) -> usize {
        self.state.sweep_expired()
    }

    /// Wait until every mirror write queued before this call has finished.
    pub async fn flush(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.mirror_tx.send(MirrorCommand::Flush(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    pub fn stats(&self) -> LedgerStats {
        let counters = &self.state.counters;
        LedgerStats {
            store_fallbacks: counters.store_fallbacks.load(Ordering::Relaxed),
            mirror_failures: counters.mirror_failures.load(Ordering::Relaxed),
            duplicates_detected: counters.duplicates_detected.load(Ordering::Relaxed),
            swept: counters.swept.load(Ordering::Relaxed),
        }
    }

    /// Stop the background sweep. Safe to call more than once.
    pub fn destroy(&self) {
        self.sweep_cancel.cancel();
        let handle = self
            .sweep_task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!("ledger sweep stopped");
        }
    }

    pub fn is_destroyed(&self) -> bool {
        self.sweep_cancel.is_cancelled()
    }
}

impl Drop for Ledger {
    fn drop(&mut self) {
        self.destroy();
    }
}

fn append_request(
    config: &LedgerConfig,
    entry: &LedgerEntry,
) -> Result<AppendRequest, serde_json::Error> {
    Ok(AppendRequest {
        scope: config.namespace.clone(),
        dedupe_key: Some(entry.dedupe_key.clone()),
        kind: LEDGER_RECORD_TYPE.to_string(),
        title: entry.dedupe_key.clone(),
        content: serde_json::to_string(entry)?,
        tags: vec!["ledger".to_string(), "dedupe".to_string()],
        importance: 3,
        source_agent: config.source_agent.clone(),
    })
}

async fn run_mirror_writer(
    config: LedgerConfig,
    store: Arc<dyn PersistentStore>,
    state: Arc<LedgerState>,
    mut mirror_rx: mpsc::UnboundedReceiver<MirrorCommand>,
) {
    while let Some(command) = mirror_rx.recv().await {
        match command {
            MirrorCommand::Write(entry) => {
                let result = match append_request(&config, &entry) {
                    Ok(request) => with_deadline(config.call_timeout, store.append(request))
                        .await
                        .map(|_| ()),
                    Err(error) => Err(StoreError::Decode(error.to_string())),
                };
                match result {
                    Ok(()) => {
                        state.unsynced().remove(&entry.dedupe_key);
                    }
                    Err(error) => {
                        if error.is_connectivity() {
                            state.unsynced().insert(entry.dedupe_key.clone());
                        }
                        state
                            .counters
                            .mirror_failures
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(
                            key = %entry.dedupe_key,
                            error = %error,
                            "failed to mirror ledger entry; kept in local cache only"
                        );
                    }
                }
            }
            MirrorCommand::Flush(done) => {
                let _ = done.send(());
            }
        }
    }
}

async fn run_sweeper(state: Arc<LedgerState>, period: Duration, cancel: CancellationToken) {
    let period = period.max(Duration::from_millis(10));
    let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                break;
            }
            _ = ticker.tick() => {
                let removed = state.sweep_expired();
                if removed > 0 {
                    debug!(removed, "swept expired ledger entries");
                }
            }
        }
    }
}

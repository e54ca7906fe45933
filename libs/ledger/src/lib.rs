//! Deduplication and retry ledger.
//!
//! The ledger answers "has this idempotency key already been handled, and if
//! it failed, should it be retried and when". Strong guarantees are delegated
//! to the persistent store: [`Ledger::record_if_not_duplicate`] is the only
//! operation that is atomic across processes. When the store cannot be reached
//! every operation degrades to the local cache and says so in its result.

mod config;
mod entry;
mod keys;
mod ledger;
mod retry;

pub use config::{DEFAULT_NAMESPACE, LedgerConfig};
pub use entry::{LedgerEntry, RetryState};
pub use keys::{
    ParseGranularityError, WindowGranularity, dedupe_key, time_window_key, time_window_key_at,
};
pub use ledger::{Consistency, DedupeOutcome, Ledger, LedgerStats, RestoreReport};
pub use retry::{RetryDecision, RetryPolicy};

/// Store record type used for ledger entries.
pub const LEDGER_RECORD_TYPE: &str = "dedupe";

//! Persistent key store client.
//!
//! The store is an HTTP service with two operations: a conditional append that
//! enforces uniqueness on an optional dedupe key, and a prefix query. Both the
//! ledger and the router talk to it through the [`PersistentStore`] trait so
//! tests can swap in [`MemoryStore`].

mod deadline;
mod error;
mod http;
mod memory;
mod types;

use async_trait::async_trait;

pub use deadline::{DEFAULT_CALL_TIMEOUT, with_deadline};
pub use error::StoreError;
pub use http::{HttpStore, HttpStoreConfig};
pub use memory::{DuplicateSignal, MemoryStore};
pub use types::{AppendOutcome, AppendRequest, QueryRequest, StoreItem};

#[async_trait]
pub trait PersistentStore: Send + Sync + 'static {
    /// Append a record. When `request.dedupe_key` is set and a record with the
    /// same key already exists in `request.scope`, the outcome is either
    /// [`AppendOutcome::Conflict`] or [`AppendOutcome::Updated`] depending on
    /// the backend; callers treat both as "already exists".
    async fn append(&self, request: AppendRequest) -> Result<AppendOutcome, StoreError>;

    async fn query(&self, request: QueryRequest) -> Result<Vec<StoreItem>, StoreError>;
}

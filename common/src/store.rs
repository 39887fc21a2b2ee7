//! Document store collaborator traits.
//!
//! A [`DocumentStore`] is a long-lived, shareable connection. Each coordinated
//! transaction derives its own [`TransactionalScope`] from it; the scope is
//! owned by exactly one in-flight plan and every operation issued through it
//! is enlisted in the same transaction.

use async_trait::async_trait;
use bson::{Bson, Document};
use serde::{Deserialize, Serialize};

use crate::{ScopeId, StoreResult, TransactionOptions};

/// How a scope ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScopeResolution {
    /// Transaction open, operations allowed.
    Active,
    /// Writes are durable and visible.
    Committed,
    /// Writes were discarded.
    Aborted,
}

impl ScopeResolution {
    /// Check if the scope can no longer change state.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, ScopeResolution::Active)
    }
}

/// Result of `insert_one`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertOutcome {
    pub inserted_id: Bson,
}

/// Result of `update_one`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateOutcome {
    pub matched_count: u64,
    pub modified_count: u64,
    pub upserted_id: Option<Bson>,
}

/// Result of `delete_one`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteOutcome {
    pub deleted_count: u64,
}

/// A long-lived connection to a document store.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// The scope type this store hands out.
    type Scope: TransactionalScope;

    /// Short backend name for logs.
    fn backend(&self) -> &'static str;

    /// Open a transactional scope.
    ///
    /// Fails with [`StoreError::Connection`](crate::StoreError::Connection)
    /// when the store is not connected.
    async fn start_scope(&self, options: &TransactionOptions) -> StoreResult<Self::Scope>;

    /// Check that a collection exists.
    async fn collection_exists(&self, name: &str) -> StoreResult<bool>;
}

/// A transaction context owned by one coordinator invocation.
///
/// `commit`, `abort` and `release` are idempotent once the scope is resolved:
/// they return the existing resolution and never fail. Dropping an unresolved
/// scope must discard its pending writes.
#[async_trait]
pub trait TransactionalScope: Send {
    /// Scope identifier for logs.
    fn id(&self) -> ScopeId;

    /// Current resolution.
    fn resolution(&self) -> ScopeResolution;

    /// Insert a document. A missing `_id` is generated by the store.
    async fn insert_one(&mut self, collection: &str, document: Document)
        -> StoreResult<InsertOutcome>;

    /// Update the first document matching `filter`.
    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome>;

    /// Delete the first document matching `filter`.
    async fn delete_one(&mut self, collection: &str, filter: &Document)
        -> StoreResult<DeleteOutcome>;

    /// Find the first document matching `filter`.
    async fn find_one(&mut self, collection: &str, filter: &Document)
        -> StoreResult<Option<Document>>;

    /// Make the scope's writes durable.
    ///
    /// A failed commit leaves the scope aborted.
    async fn commit(&mut self) -> StoreResult<ScopeResolution>;

    /// Discard the scope's writes.
    async fn abort(&mut self) -> StoreResult<ScopeResolution>;

    /// Resolve the scope if still open (by aborting) and return how it ended.
    async fn release(&mut self) -> StoreResult<ScopeResolution> {
        if self.resolution().is_resolved() {
            return Ok(self.resolution());
        }
        self.abort().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_states() {
        assert!(!ScopeResolution::Active.is_resolved());
        assert!(ScopeResolution::Committed.is_resolved());
        assert!(ScopeResolution::Aborted.is_resolved());
    }
}

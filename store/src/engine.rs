//! In-memory store engine.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bson::{Bson, Document};
use parking_lot::RwLock;
use tracing::{debug, info, instrument, warn};

use atomicdoc_common::{
    DocumentStore, StoreError, StoreResult, TransactionOptions, TransactionalScope,
};

use crate::collection::{CollectionData, CollectionRules};
use crate::fault::{FaultInjector, FaultPoint, InjectedFault};
use crate::journal::{CommitRecord, Journal};
use crate::matcher;
use crate::scope::MemoryScope;

/// Committed state shared by the store and its scopes.
#[derive(Debug)]
pub(crate) struct StoreState {
    pub connected: bool,
    pub collections: HashMap<String, Arc<CollectionData>>,
    /// Sequence number of the last applied commit.
    pub sequence: u64,
}

pub(crate) type SharedState = Arc<RwLock<StoreState>>;

/// A transactional document store held entirely in memory.
///
/// Cloning is cheap and every clone sees the same data.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    state: SharedState,
    journal: Arc<Journal>,
    faults: Arc<FaultInjector>,
}

impl MemoryStore {
    /// Create an empty, connected store.
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(StoreState {
                connected: true,
                collections: HashMap::new(),
                sequence: 0,
            })),
            journal: Arc::new(Journal::new()),
            faults: Arc::new(FaultInjector::new()),
        }
    }

    /// Create a collection with no validation rules. Existing collections
    /// are left untouched.
    pub fn create_collection(&self, name: impl Into<String>) {
        self.create_collection_with_rules(name, CollectionRules::new());
    }

    /// Create a collection whose writes must satisfy `rules`.
    pub fn create_collection_with_rules(&self, name: impl Into<String>, rules: CollectionRules) {
        let name = name.into();
        let mut state = self.state.write();
        if state.collections.contains_key(&name) {
            debug!(collection = %name, "Collection already exists");
            return;
        }
        info!(collection = %name, constraints = rules.constraints.len(), "Creating collection");
        state
            .collections
            .insert(name, Arc::new(CollectionData::new(rules)));
    }

    /// Drop a collection and its documents.
    pub fn drop_collection(&self, name: &str) -> bool {
        let removed = self.state.write().collections.remove(name).is_some();
        if removed {
            info!(collection = %name, "Dropped collection");
        }
        removed
    }

    /// Insert documents outside of any caller-visible transaction.
    ///
    /// All documents are committed together; on error nothing is written.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    pub async fn insert_many(
        &self,
        collection: &str,
        documents: Vec<Document>,
    ) -> StoreResult<Vec<Bson>> {
        let mut scope = self.start_scope(&TransactionOptions::default()).await?;
        let mut ids = Vec::with_capacity(documents.len());
        for document in documents {
            match scope.insert_one(collection, document).await {
                Ok(outcome) => ids.push(outcome.inserted_id),
                Err(e) => {
                    scope.abort().await?;
                    return Err(e);
                }
            }
        }
        scope.commit().await?;
        Ok(ids)
    }

    /// Every committed document in a collection, in insertion order.
    pub fn find_all(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let state = self.state.read();
        let data = state
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::NamespaceNotFound(collection.to_string()))?;
        Ok(data.documents.iter().map(|d| d.document.clone()).collect())
    }

    /// First committed document matching `filter`.
    pub fn find_one(&self, collection: &str, filter: &Document) -> StoreResult<Option<Document>> {
        let state = self.state.read();
        let data = state
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::NamespaceNotFound(collection.to_string()))?;
        Ok(data
            .position(filter)?
            .map(|index| data.documents[index].document.clone()))
    }

    /// Number of committed documents matching `filter`.
    pub fn count(&self, collection: &str, filter: &Document) -> StoreResult<usize> {
        let state = self.state.read();
        let data = state
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::NamespaceNotFound(collection.to_string()))?;
        let mut count = 0;
        for stored in &data.documents {
            if matcher::matches(&stored.document, filter)? {
                count += 1;
            }
        }
        Ok(count)
    }

    /// Commit records so far.
    pub fn journal(&self) -> Vec<CommitRecord> {
        self.journal.records()
    }

    /// Number of commits that wrote at least one document.
    pub fn commit_count(&self) -> usize {
        self.journal.len()
    }

    /// Queue a one-shot fault.
    pub fn inject_fault(&self, fault: InjectedFault) {
        warn!(point = ?fault.point, error = %fault.error, "Injecting fault");
        self.faults.push(fault);
    }

    /// Drop every queued fault.
    pub fn clear_faults(&self) {
        self.faults.clear();
    }

    /// Delay applied before each scope operation.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.faults.set_latency(latency);
    }

    /// Simulate losing the connection.
    pub fn disconnect(&self) {
        warn!("Store disconnected");
        self.state.write().connected = false;
    }

    pub fn reconnect(&self) {
        info!("Store reconnected");
        self.state.write().connected = true;
    }

    pub fn is_connected(&self) -> bool {
        self.state.read().connected
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    type Scope = MemoryScope;

    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn start_scope(&self, options: &TransactionOptions) -> StoreResult<MemoryScope> {
        if let Some(error) = self.faults.take(FaultPoint::StartScope, None) {
            return Err(error);
        }

        let snapshot = {
            let state = self.state.read();
            if !state.connected {
                return Err(StoreError::Connection("memory store is disconnected".into()));
            }
            state.collections.clone()
        };

        Ok(MemoryScope::new(
            snapshot,
            options.clone(),
            self.state.clone(),
            self.journal.clone(),
            self.faults.clone(),
        ))
    }

    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        let state = self.state.read();
        if !state.connected {
            return Err(StoreError::Connection("memory store is disconnected".into()));
        }
        Ok(state.collections.contains_key(name))
    }
}

//! Transactional scopes over the in-memory store.
//!
//! A scope works on a private copy of the collections taken when it starts.
//! Reads see that snapshot plus the scope's own writes. On commit the scope
//! checks every document it wrote against the committed state: if another
//! scope committed a write to the same document first, the commit fails with
//! a write conflict and nothing is published.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bson::{oid::ObjectId, Bson, Document};
use tracing::{debug, info, instrument, warn};

use atomicdoc_common::{
    now, DeleteOutcome, InsertOutcome, ScopeId, ScopeResolution, StoreError, StoreResult,
    TransactionOptions, TransactionalScope, UpdateOutcome,
};

use crate::collection::{id_key, CollectionData, StoredDocument};
use crate::engine::SharedState;
use crate::fault::{FaultInjector, FaultPoint};
use crate::journal::{CommitRecord, Journal, JournalWrite, WriteKind};
use crate::update::{apply_update, upsert_document, with_id_first};

/// A document the scope wrote, with the committed version it started from.
#[derive(Debug, Clone)]
struct Touched {
    collection: String,
    key: String,
    id: Bson,
    /// `None` when the document did not exist in the snapshot.
    base_version: Option<u64>,
}

/// Transaction context handed out by [`MemoryStore`](crate::MemoryStore).
#[derive(Debug)]
pub struct MemoryScope {
    id: ScopeId,
    options: TransactionOptions,
    resolution: ScopeResolution,
    working: HashMap<String, Arc<CollectionData>>,
    touched: Vec<Touched>,
    state: SharedState,
    journal: Arc<Journal>,
    faults: Arc<FaultInjector>,
}

impl MemoryScope {
    pub(crate) fn new(
        snapshot: HashMap<String, Arc<CollectionData>>,
        options: TransactionOptions,
        state: SharedState,
        journal: Arc<Journal>,
        faults: Arc<FaultInjector>,
    ) -> Self {
        let id = ScopeId::new();
        debug!(scope_id = %id, "Scope started");
        Self {
            id,
            options,
            resolution: ScopeResolution::Active,
            working: snapshot,
            touched: Vec::new(),
            state,
            journal,
            faults,
        }
    }

    /// Options the scope was opened with.
    pub fn options(&self) -> &TransactionOptions {
        &self.options
    }

    /// Number of documents written so far.
    pub fn pending_writes(&self) -> usize {
        self.touched.len()
    }

    async fn before_operation(&self, collection: &str) -> StoreResult<()> {
        self.ensure_active()?;
        if let Some(latency) = self.faults.latency() {
            tokio::time::sleep(latency).await;
        }
        if !self.state.read().connected {
            return Err(StoreError::Network("memory store is disconnected".into()));
        }
        match self.faults.take(FaultPoint::Operation, Some(collection)) {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn ensure_active(&self) -> StoreResult<()> {
        if self.resolution.is_resolved() {
            return Err(StoreError::InvalidOperation(format!(
                "scope {} is already {:?}",
                self.id, self.resolution
            )));
        }
        Ok(())
    }

    /// Validate against committed state and apply. Runs under the store's
    /// write lock; returns `None` when the scope wrote nothing.
    fn publish(&self) -> StoreResult<Option<CommitRecord>> {
        let mut state = self.state.write();
        if !state.connected {
            return Err(StoreError::Network("memory store is disconnected".into()));
        }

        for touched in &self.touched {
            let data = state
                .collections
                .get(&touched.collection)
                .ok_or_else(|| StoreError::NamespaceNotFound(touched.collection.clone()))?;
            let current = data.get(&touched.key).map(|stored| stored.version);
            if current != touched.base_version {
                return Err(StoreError::WriteConflict {
                    collection: touched.collection.clone(),
                    message: format!(
                        "document {} was modified by another transaction",
                        touched.id
                    ),
                });
            }
        }

        if self.touched.is_empty() {
            return Ok(None);
        }

        state.sequence += 1;
        let sequence = state.sequence;
        let mut writes = Vec::with_capacity(self.touched.len());

        for touched in &self.touched {
            let written = self
                .working
                .get(&touched.collection)
                .and_then(|data| data.get(&touched.key));
            let Some(target) = state.collections.get_mut(&touched.collection) else {
                continue;
            };
            let target = Arc::make_mut(target);

            let kind = match (touched.base_version, written) {
                (None, Some(stored)) => {
                    target.put(StoredDocument {
                        version: sequence,
                        ..stored.clone()
                    });
                    WriteKind::Insert
                }
                (Some(_), Some(stored)) => {
                    target.put(StoredDocument {
                        version: sequence,
                        ..stored.clone()
                    });
                    WriteKind::Update
                }
                (Some(_), None) => {
                    target.remove(&touched.key);
                    WriteKind::Delete
                }
                // Inserted and deleted within the scope.
                (None, None) => continue,
            };

            writes.push(JournalWrite {
                collection: touched.collection.clone(),
                document_id: touched.id.clone(),
                kind,
            });
        }

        let record = CommitRecord {
            sequence,
            scope_id: self.id,
            committed_at: now(),
            writes,
        };
        self.journal.append(record.clone());
        Ok(Some(record))
    }
}

fn working_mut<'a>(
    working: &'a mut HashMap<String, Arc<CollectionData>>,
    collection: &str,
) -> StoreResult<&'a mut CollectionData> {
    working
        .get_mut(collection)
        .map(Arc::make_mut)
        .ok_or_else(|| StoreError::NamespaceNotFound(collection.to_string()))
}

/// Remember the committed version of a document before its first write.
fn note_write(
    touched: &mut Vec<Touched>,
    collection: &str,
    data: &CollectionData,
    key: &str,
    id: &Bson,
) {
    if touched
        .iter()
        .any(|t| t.collection == collection && t.key == key)
    {
        return;
    }
    touched.push(Touched {
        collection: collection.to_string(),
        key: key.to_string(),
        id: id.clone(),
        base_version: data.get(key).map(|stored| stored.version),
    });
}

fn validate(collection: &str, data: &CollectionData, document: &Document) -> StoreResult<()> {
    data.rules
        .validate(document)
        .map_err(|message| StoreError::ValidationFailed {
            collection: collection.to_string(),
            message,
        })
}

#[async_trait]
impl TransactionalScope for MemoryScope {
    fn id(&self) -> ScopeId {
        self.id
    }

    fn resolution(&self) -> ScopeResolution {
        self.resolution
    }

    async fn insert_one(
        &mut self,
        collection: &str,
        document: Document,
    ) -> StoreResult<InsertOutcome> {
        self.before_operation(collection).await?;

        let id = document
            .get("_id")
            .cloned()
            .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
        let key = id_key(&id);
        let document = with_id_first(id.clone(), document);

        let data = working_mut(&mut self.working, collection)?;
        if data.get(&key).is_some() {
            return Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key,
            });
        }
        validate(collection, data, &document)?;

        note_write(&mut self.touched, collection, data, &key, &id);
        data.put(StoredDocument {
            id: id.clone(),
            version: 0,
            document,
        });

        Ok(InsertOutcome { inserted_id: id })
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.before_operation(collection).await?;

        let data = working_mut(&mut self.working, collection)?;
        match data.position(filter)? {
            Some(index) => {
                let mut updated = data.documents[index].document.clone();
                if !apply_update(&mut updated, update)? {
                    return Ok(UpdateOutcome {
                        matched_count: 1,
                        modified_count: 0,
                        upserted_id: None,
                    });
                }
                validate(collection, data, &updated)?;

                let id = data.documents[index].id.clone();
                let key = id_key(&id);
                note_write(&mut self.touched, collection, data, &key, &id);
                data.documents[index].document = updated;

                Ok(UpdateOutcome {
                    matched_count: 1,
                    modified_count: 1,
                    upserted_id: None,
                })
            }
            None if upsert => {
                let document = upsert_document(filter, update)?;
                let id = document
                    .get("_id")
                    .cloned()
                    .ok_or_else(|| StoreError::Internal("upserted document has no _id".into()))?;
                let key = id_key(&id);
                if data.get(&key).is_some() {
                    return Err(StoreError::DuplicateKey {
                        collection: collection.to_string(),
                        key,
                    });
                }
                validate(collection, data, &document)?;

                note_write(&mut self.touched, collection, data, &key, &id);
                data.put(StoredDocument {
                    id: id.clone(),
                    version: 0,
                    document,
                });

                Ok(UpdateOutcome {
                    matched_count: 0,
                    modified_count: 0,
                    upserted_id: Some(id),
                })
            }
            None => Ok(UpdateOutcome {
                matched_count: 0,
                modified_count: 0,
                upserted_id: None,
            }),
        }
    }

    async fn delete_one(
        &mut self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<DeleteOutcome> {
        self.before_operation(collection).await?;

        let data = working_mut(&mut self.working, collection)?;
        let Some(index) = data.position(filter)? else {
            return Ok(DeleteOutcome { deleted_count: 0 });
        };

        let id = data.documents[index].id.clone();
        let key = id_key(&id);
        note_write(&mut self.touched, collection, data, &key, &id);
        data.documents.remove(index);

        Ok(DeleteOutcome { deleted_count: 1 })
    }

    async fn find_one(
        &mut self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        self.before_operation(collection).await?;

        let data = self
            .working
            .get(collection)
            .ok_or_else(|| StoreError::NamespaceNotFound(collection.to_string()))?;
        Ok(data
            .position(filter)?
            .map(|index| data.documents[index].document.clone()))
    }

    #[instrument(skip(self), fields(scope_id = %self.id))]
    async fn commit(&mut self) -> StoreResult<ScopeResolution> {
        if self.resolution.is_resolved() {
            return Ok(self.resolution);
        }

        if let Some(error) = self.faults.take(FaultPoint::Commit, None) {
            warn!(error = %error, "Commit failed");
            self.resolution = ScopeResolution::Aborted;
            return Err(error);
        }

        match self.publish() {
            Ok(record) => {
                self.resolution = ScopeResolution::Committed;
                match record {
                    Some(record) => info!(
                        sequence = record.sequence,
                        writes = record.writes.len(),
                        "Scope committed"
                    ),
                    None => debug!("Scope committed with no writes"),
                }
                Ok(self.resolution)
            }
            Err(error) => {
                warn!(error = %error, "Commit rejected, scope aborted");
                self.resolution = ScopeResolution::Aborted;
                Err(error)
            }
        }
    }

    async fn abort(&mut self) -> StoreResult<ScopeResolution> {
        if self.resolution.is_resolved() {
            return Ok(self.resolution);
        }
        debug!(scope_id = %self.id, discarded = self.touched.len(), "Scope aborted");
        self.resolution = ScopeResolution::Aborted;
        self.working.clear();
        self.touched.clear();
        Ok(self.resolution)
    }
}

impl Drop for MemoryScope {
    fn drop(&mut self) {
        if !self.resolution.is_resolved() {
            debug!(scope_id = %self.id, discarded = self.touched.len(), "Unresolved scope dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CollectionRules, InjectedFault, MemoryStore};
    use atomicdoc_common::DocumentStore;
    use bson::doc;

    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        store.create_collection_with_rules(
            "accounts",
            CollectionRules::new().minimum("balance", 0.0),
        );
        store
            .insert_many(
                "accounts",
                vec![
                    doc! { "_id": "account1", "balance": 500 },
                    doc! { "_id": "account2", "balance": 0 },
                ],
            )
            .await
            .unwrap();
        store
    }

    fn balance(store: &MemoryStore, id: &str) -> i32 {
        store
            .find_one("accounts", &doc! { "_id": id })
            .unwrap()
            .unwrap()
            .get_i32("balance")
            .unwrap()
    }

    #[tokio::test]
    async fn test_writes_invisible_until_commit() {
        let store = seeded().await;
        let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();

        let outcome = scope
            .update_one(
                "accounts",
                &doc! { "_id": "account1" },
                &doc! { "$inc": { "balance": -100 } },
                false,
            )
            .await
            .unwrap();
        assert_eq!(outcome.modified_count, 1);

        // Own writes are visible inside the scope, not outside.
        let inside = scope
            .find_one("accounts", &doc! { "_id": "account1" })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(inside.get_i32("balance").unwrap(), 400);
        assert_eq!(balance(&store, "account1"), 500);

        assert_eq!(scope.commit().await.unwrap(), ScopeResolution::Committed);
        assert_eq!(balance(&store, "account1"), 400);
    }

    #[tokio::test]
    async fn test_abort_discards_writes() {
        let store = seeded().await;
        let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();
        scope
            .insert_one("accounts", doc! { "_id": "account3", "balance": 10 })
            .await
            .unwrap();

        assert_eq!(scope.abort().await.unwrap(), ScopeResolution::Aborted);
        // Idempotent.
        assert_eq!(scope.abort().await.unwrap(), ScopeResolution::Aborted);
        assert_eq!(scope.commit().await.unwrap(), ScopeResolution::Aborted);
        assert_eq!(store.count("accounts", &doc! {}).unwrap(), 2);
    }

    #[tokio::test]
    async fn test_operations_rejected_after_resolution() {
        let store = seeded().await;
        let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();
        scope.commit().await.unwrap();

        let result = scope.find_one("accounts", &doc! {}).await;
        assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
        assert_eq!(scope.release().await.unwrap(), ScopeResolution::Committed);
    }

    #[tokio::test]
    async fn test_concurrent_write_conflict() {
        let store = seeded().await;
        let debit = doc! { "$inc": { "balance": -100 } };

        let mut first = store.start_scope(&TransactionOptions::default()).await.unwrap();
        let mut second = store.start_scope(&TransactionOptions::default()).await.unwrap();

        first.update_one("accounts", &doc! { "_id": "account1" }, &debit, false).await.unwrap();
        second.update_one("accounts", &doc! { "_id": "account1" }, &debit, false).await.unwrap();

        first.commit().await.unwrap();
        let error = second.commit().await.unwrap_err();
        assert!(matches!(error, StoreError::WriteConflict { .. }));
        assert!(error.is_transient());
        assert_eq!(second.resolution(), ScopeResolution::Aborted);
        assert_eq!(balance(&store, "account1"), 400);
    }

    #[tokio::test]
    async fn test_validation_and_duplicate_key() {
        let store = seeded().await;
        let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();

        let overdraft = scope
            .update_one(
                "accounts",
                &doc! { "_id": "account2" },
                &doc! { "$inc": { "balance": -1 } },
                false,
            )
            .await;
        assert!(matches!(overdraft, Err(StoreError::ValidationFailed { .. })));

        let duplicate = scope
            .insert_one("accounts", doc! { "_id": "account1", "balance": 1 })
            .await;
        assert!(matches!(duplicate, Err(StoreError::DuplicateKey { .. })));

        let missing = scope.insert_one("ledger", doc! { "x": 1 }).await;
        assert!(matches!(missing, Err(StoreError::NamespaceNotFound(_))));
    }

    #[tokio::test]
    async fn test_update_no_match_and_upsert() {
        let store = seeded().await;
        let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();

        let none = scope
            .update_one(
                "accounts",
                &doc! { "_id": "nobody" },
                &doc! { "$set": { "balance": 1 } },
                false,
            )
            .await
            .unwrap();
        assert_eq!((none.matched_count, none.modified_count), (0, 0));

        let upserted = scope
            .update_one(
                "accounts",
                &doc! { "_id": "account9" },
                &doc! { "$set": { "balance": 9 } },
                true,
            )
            .await
            .unwrap();
        assert_eq!(upserted.upserted_id, Some(Bson::from("account9")));

        scope.commit().await.unwrap();
        assert_eq!(balance(&store, "account9"), 9);
        let record = store.journal().pop().unwrap();
        assert_eq!(record.count(WriteKind::Insert), 1);
    }

    #[tokio::test]
    async fn test_delete_and_generated_ids() {
        let store = seeded().await;
        let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();

        let deleted = scope.delete_one("accounts", &doc! { "_id": "account2" }).await.unwrap();
        assert_eq!(deleted.deleted_count, 1);
        let again = scope.delete_one("accounts", &doc! { "_id": "account2" }).await.unwrap();
        assert_eq!(again.deleted_count, 0);

        let inserted = scope.insert_one("accounts", doc! { "balance": 1 }).await.unwrap();
        assert!(matches!(inserted.inserted_id, Bson::ObjectId(_)));

        scope.commit().await.unwrap();
        assert_eq!(store.count("accounts", &doc! {}).unwrap(), 2);
        let record = store.journal().pop().unwrap();
        assert_eq!(record.count(WriteKind::Delete), 1);
        assert_eq!(record.count(WriteKind::Insert), 1);
    }

    #[tokio::test]
    async fn test_commit_fault_aborts_scope() {
        let store = seeded().await;
        store.inject_fault(InjectedFault::new(
            FaultPoint::Commit,
            StoreError::TransientTransaction("injected".into()),
        ));

        let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();
        scope
            .update_one(
                "accounts",
                &doc! { "_id": "account1" },
                &doc! { "$set": { "balance": 1 } },
                false,
            )
            .await
            .unwrap();

        assert!(scope.commit().await.is_err());
        assert_eq!(scope.resolution(), ScopeResolution::Aborted);
        assert_eq!(balance(&store, "account1"), 500);
    }

    #[tokio::test]
    async fn test_dropped_scope_discards_writes() {
        let store = seeded().await;
        {
            let mut scope = store.start_scope(&TransactionOptions::default()).await.unwrap();
            scope.delete_one("accounts", &doc! { "_id": "account1" }).await.unwrap();
        }
        assert_eq!(store.count("accounts", &doc! {}).unwrap(), 2);
    }
}

//! MongoDB-backed document store.
//!
//! Each scope owns one client session with an open multi-document
//! transaction. Dropping an unresolved scope drops the session, and the
//! driver aborts the transaction on its way out.

use async_trait::async_trait;
use bson::{doc, Document};
use mongodb::{
    error::UNKNOWN_TRANSACTION_COMMIT_RESULT, Client, ClientSession, Collection, Database,
};
use tracing::{debug, info, warn};

use atomicdoc_common::{
    DeleteOutcome, DocumentStore, InsertOutcome, ScopeId, ScopeResolution, StoreError, StoreResult,
    TransactionOptions, TransactionalScope, UpdateOutcome,
};

use crate::connection::Connection;
use crate::error::store_error;
use crate::options::transaction_options;

/// Commit attempts while the server reports an unknown commit result.
const COMMIT_ATTEMPTS: u32 = 3;

/// Document store over one MongoDB database.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    /// Store over the connection's default database.
    pub fn new(connection: &Connection) -> Self {
        Self {
            client: connection.client().clone(),
            database: connection.database().clone(),
        }
    }

    /// Store over a named database on the same client.
    pub fn with_database(connection: &Connection, name: &str) -> Self {
        Self {
            client: connection.client().clone(),
            database: connection.use_database(name),
        }
    }

    pub fn database_name(&self) -> &str {
        self.database.name()
    }

    /// Drop a collection and create it again, optionally with a validator.
    pub async fn reset_collection(
        &self,
        name: &str,
        validator: Option<Document>,
    ) -> StoreResult<()> {
        self.database
            .collection::<Document>(name)
            .drop()
            .await
            .map_err(|e| store_error(e, name))?;

        let mut create = self.database.create_collection(name);
        if let Some(validator) = validator {
            create = create.validator(validator);
        }
        create.await.map_err(|e| store_error(e, name))?;
        debug!(collection = %name, "Collection reset");
        Ok(())
    }

    /// Read the committed state of one document, outside any transaction.
    pub async fn find_one(
        &self,
        collection: &str,
        filter: Document,
    ) -> StoreResult<Option<Document>> {
        self.database
            .collection::<Document>(collection)
            .find_one(filter)
            .await
            .map_err(|e| store_error(e, collection))
    }

    /// Shut the client down. Scopes opened afterwards fail to connect.
    pub async fn disconnect(&self) {
        info!(database = %self.database.name(), "Disconnecting MongoDB store");
        self.client.clone().shutdown().await;
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    type Scope = MongoScope;

    fn backend(&self) -> &'static str {
        "mongodb"
    }

    async fn start_scope(&self, options: &TransactionOptions) -> StoreResult<MongoScope> {
        let mut session = self
            .client
            .start_session()
            .await
            .map_err(|e| match store_error(e, "") {
                StoreError::Internal(message) | StoreError::Network(message) => {
                    StoreError::Connection(message)
                }
                other => other,
            })?;

        session
            .start_transaction()
            .with_options(transaction_options(options))
            .await
            .map_err(|e| store_error(e, ""))?;

        let scope = MongoScope {
            id: ScopeId::new(),
            session,
            database: self.database.clone(),
            resolution: ScopeResolution::Active,
        };
        debug!(scope_id = %scope.id, database = %self.database.name(), "Transaction started");
        Ok(scope)
    }

    async fn collection_exists(&self, name: &str) -> StoreResult<bool> {
        let names = self
            .database
            .list_collection_names()
            .filter(doc! { "name": name })
            .await
            .map_err(|e| store_error(e, name))?;
        Ok(names.iter().any(|n| n == name))
    }
}

/// One MongoDB transaction.
pub struct MongoScope {
    id: ScopeId,
    session: ClientSession,
    database: Database,
    resolution: ScopeResolution,
}

impl MongoScope {
    fn ensure_active(&self) -> StoreResult<()> {
        if self.resolution.is_resolved() {
            return Err(StoreError::InvalidOperation(format!(
                "scope {} is already {:?}",
                self.id, self.resolution
            )));
        }
        Ok(())
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection::<Document>(name)
    }
}

#[async_trait]
impl TransactionalScope for MongoScope {
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
        self.ensure_active()?;
        let result = self
            .collection(collection)
            .insert_one(document)
            .session(&mut self.session)
            .await
            .map_err(|e| store_error(e, collection))?;
        Ok(InsertOutcome {
            inserted_id: result.inserted_id,
        })
    }

    async fn update_one(
        &mut self,
        collection: &str,
        filter: &Document,
        update: &Document,
        upsert: bool,
    ) -> StoreResult<UpdateOutcome> {
        self.ensure_active()?;
        let result = self
            .collection(collection)
            .update_one(filter.clone(), update.clone())
            .upsert(upsert)
            .session(&mut self.session)
            .await
            .map_err(|e| store_error(e, collection))?;
        Ok(UpdateOutcome {
            matched_count: result.matched_count,
            modified_count: result.modified_count,
            upserted_id: result.upserted_id,
        })
    }

    async fn delete_one(
        &mut self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<DeleteOutcome> {
        self.ensure_active()?;
        let result = self
            .collection(collection)
            .delete_one(filter.clone())
            .session(&mut self.session)
            .await
            .map_err(|e| store_error(e, collection))?;
        Ok(DeleteOutcome {
            deleted_count: result.deleted_count,
        })
    }

    async fn find_one(
        &mut self,
        collection: &str,
        filter: &Document,
    ) -> StoreResult<Option<Document>> {
        self.ensure_active()?;
        self.collection(collection)
            .find_one(filter.clone())
            .session(&mut self.session)
            .await
            .map_err(|e| store_error(e, collection))
    }

    async fn commit(&mut self) -> StoreResult<ScopeResolution> {
        if self.resolution.is_resolved() {
            return Ok(self.resolution);
        }

        let mut attempt = 1;
        loop {
            match self.session.commit_transaction().await {
                Ok(()) => {
                    self.resolution = ScopeResolution::Committed;
                    debug!(scope_id = %self.id, "Transaction committed");
                    return Ok(self.resolution);
                }
                Err(e) if e.contains_label(UNKNOWN_TRANSACTION_COMMIT_RESULT)
                    && attempt < COMMIT_ATTEMPTS =>
                {
                    warn!(
                        scope_id = %self.id,
                        attempt,
                        error = %e,
                        "Commit result unknown, retrying commit"
                    );
                    attempt += 1;
                }
                Err(e) => {
                    let error = store_error(e, "");
                    warn!(scope_id = %self.id, error = %error, "Commit failed");
                    // The server discards the transaction; try to release it
                    // on our side as well.
                    if let Err(abort) = self.session.abort_transaction().await {
                        debug!(scope_id = %self.id, error = %abort, "Abort after failed commit");
                    }
                    self.resolution = ScopeResolution::Aborted;
                    return Err(error);
                }
            }
        }
    }

    async fn abort(&mut self) -> StoreResult<ScopeResolution> {
        if self.resolution.is_resolved() {
            return Ok(self.resolution);
        }
        if let Err(e) = self.session.abort_transaction().await {
            // The server times the transaction out on its own.
            warn!(scope_id = %self.id, error = %e, "Abort failed");
        }
        self.resolution = ScopeResolution::Aborted;
        debug!(scope_id = %self.id, "Transaction aborted");
        Ok(self.resolution)
    }
}

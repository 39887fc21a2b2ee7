//! Seeding and fault hooks the scenarios need from a store.

use async_trait::async_trait;
use atomicdoc_common::{bson, doc, Document, DocumentStore, StoreError, TransactionalScope};
use atomicdoc_mongodb::MongoStore;
use atomicdoc_store::{CollectionRules, FaultPoint, InjectedFault, MemoryStore};

/// A store the simulator can reset, seed and read back.
#[async_trait]
pub trait Fixtures: DocumentStore {
    /// Recreate an empty collection. `minimum` installs a lower bound on a
    /// numeric field.
    async fn reset(&self, collection: &str, minimum: Option<(&str, f64)>) -> anyhow::Result<()>;

    /// Insert documents outside of any coordinated plan.
    async fn seed(&self, collection: &str, documents: Vec<Document>) -> anyhow::Result<()>;

    /// Committed state of one document.
    async fn read(&self, collection: &str, filter: Document) -> anyhow::Result<Option<Document>>;

    /// Make the next operation on `collection` fail transiently. Returns
    /// false when the backend cannot inject faults.
    fn inject_transient(&self, collection: &str) -> bool;

    fn clear_faults(&self);
}

#[async_trait]
impl Fixtures for MemoryStore {
    async fn reset(&self, collection: &str, minimum: Option<(&str, f64)>) -> anyhow::Result<()> {
        self.drop_collection(collection);
        let rules = match minimum {
            Some((field, value)) => CollectionRules::new().minimum(field, value),
            None => CollectionRules::new(),
        };
        self.create_collection_with_rules(collection, rules);
        Ok(())
    }

    async fn seed(&self, collection: &str, documents: Vec<Document>) -> anyhow::Result<()> {
        self.insert_many(collection, documents).await?;
        Ok(())
    }

    async fn read(&self, collection: &str, filter: Document) -> anyhow::Result<Option<Document>> {
        Ok(MemoryStore::find_one(self, collection, &filter)?)
    }

    fn inject_transient(&self, collection: &str) -> bool {
        self.inject_fault(
            InjectedFault::new(
                FaultPoint::Operation,
                StoreError::TransientTransaction("injected by simulator".to_string()),
            )
            .on_collection(collection),
        );
        true
    }

    fn clear_faults(&self) {
        MemoryStore::clear_faults(self);
    }
}

#[async_trait]
impl Fixtures for MongoStore {
    async fn reset(&self, collection: &str, minimum: Option<(&str, f64)>) -> anyhow::Result<()> {
        let validator = minimum.map(|(field, value)| {
            let mut properties = Document::new();
            properties.insert(field, doc! { "minimum": value });
            doc! { "$jsonSchema": { "properties": properties } }
        });
        self.reset_collection(collection, validator).await?;
        Ok(())
    }

    async fn seed(&self, collection: &str, documents: Vec<Document>) -> anyhow::Result<()> {
        let mut scope = self.start_scope(&Default::default()).await?;
        for document in documents {
            scope.insert_one(collection, document).await?;
        }
        scope.commit().await?;
        Ok(())
    }

    async fn read(&self, collection: &str, filter: Document) -> anyhow::Result<Option<Document>> {
        Ok(self.find_one(collection, filter).await?)
    }

    fn inject_transient(&self, _collection: &str) -> bool {
        false
    }

    fn clear_faults(&self) {}
}

/// Read a numeric field as an integer, whatever width it was stored with.
pub fn integer(document: &Document, field: &str) -> Option<i64> {
    match document.get(field)? {
        bson::Bson::Int32(n) => Some(i64::from(*n)),
        bson::Bson::Int64(n) => Some(*n),
        bson::Bson::Double(n) => Some(*n as i64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_reset_installs_minimum() {
        let store = MemoryStore::new();
        store.reset("accounts", Some(("balance", 0.0))).await.unwrap();
        store
            .seed("accounts", vec![doc! { "_id": "account1", "balance": 10 }])
            .await
            .unwrap();
        assert!(store
            .seed("accounts", vec![doc! { "_id": "account2", "balance": -1 }])
            .await
            .is_err());

        store.reset("accounts", None).await.unwrap();
        assert!(store.read("accounts", doc! { "_id": "account1" }).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_memory_transient_fault() {
        let store = MemoryStore::new();
        store.reset("accounts", None).await.unwrap();
        assert!(store.inject_transient("accounts"));
        assert!(store
            .seed("accounts", vec![doc! { "_id": "account1", "balance": 10 }])
            .await
            .is_err());

        Fixtures::clear_faults(&store);
        store
            .seed("accounts", vec![doc! { "_id": "account1", "balance": 10 }])
            .await
            .unwrap();
    }

    #[test]
    fn test_integer_widths() {
        let document = doc! { "a": 1i32, "b": 2i64, "c": 3.0, "d": "x" };
        assert_eq!(integer(&document, "a"), Some(1));
        assert_eq!(integer(&document, "b"), Some(2));
        assert_eq!(integer(&document, "c"), Some(3));
        assert_eq!(integer(&document, "d"), None);
        assert_eq!(integer(&document, "e"), None);
    }
}

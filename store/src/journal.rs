//! Commit journal for the in-memory store.
//!
//! Every scope commit that wrote at least one document appends a single
//! [`CommitRecord`]. Records are never removed, so the journal doubles as an
//! audit trail for tests that assert atomic visibility.

use bson::Bson;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use atomicdoc_common::{ScopeId, Timestamp};

/// Kind of write recorded for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteKind {
    Insert,
    Update,
    Delete,
}

/// One document write within a commit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalWrite {
    /// Collection written.
    pub collection: String,
    /// `_id` of the document.
    pub document_id: Bson,
    /// What happened to it.
    pub kind: WriteKind,
}

/// All writes published by one scope commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Store-wide commit sequence number.
    pub sequence: u64,
    /// Scope that committed.
    pub scope_id: ScopeId,
    /// When the commit was applied.
    pub committed_at: Timestamp,
    /// Writes in the order they were first made.
    pub writes: Vec<JournalWrite>,
}

impl CommitRecord {
    /// Number of writes of a given kind.
    pub fn count(&self, kind: WriteKind) -> usize {
        self.writes.iter().filter(|w| w.kind == kind).count()
    }

    /// Check if the commit touched a collection.
    pub fn touches(&self, collection: &str) -> bool {
        self.writes.iter().any(|w| w.collection == collection)
    }
}

/// Append-only list of commit records.
#[derive(Debug, Default)]
pub struct Journal {
    records: Mutex<Vec<CommitRecord>>,
}

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&self, record: CommitRecord) {
        self.records.lock().push(record);
    }

    /// Copy of every record so far.
    pub fn records(&self) -> Vec<CommitRecord> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atomicdoc_common::now;

    #[test]
    fn test_record_counts() {
        let record = CommitRecord {
            sequence: 1,
            scope_id: ScopeId::new(),
            committed_at: now(),
            writes: vec![
                JournalWrite {
                    collection: "inventory".into(),
                    document_id: Bson::String("parks-rec-book".into()),
                    kind: WriteKind::Update,
                },
                JournalWrite {
                    collection: "orders".into(),
                    document_id: Bson::Int32(1),
                    kind: WriteKind::Insert,
                },
            ],
        };

        assert_eq!(record.count(WriteKind::Insert), 1);
        assert_eq!(record.count(WriteKind::Delete), 0);
        assert!(record.touches("orders"));
        assert!(!record.touches("accounts"));

        let journal = Journal::new();
        assert!(journal.is_empty());
        journal.append(record);
        assert_eq!(journal.len(), 1);
        assert_eq!(journal.records()[0].sequence, 1);
    }
}

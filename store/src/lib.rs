//! AtomicDoc In-Memory Store
//!
//! A transactional document store that keeps collections in memory. Scopes
//! read a snapshot taken when they start, buffer their writes in a private
//! copy, and publish them atomically on commit after checking that no other
//! scope wrote the same documents in the meantime.

pub mod engine;
pub mod scope;
pub mod collection;
pub mod journal;
pub mod matcher;
pub mod update;
pub mod fault;

pub use engine::MemoryStore;
pub use scope::MemoryScope;
pub use collection::{CollectionRules, FieldConstraint};
pub use journal::{CommitRecord, JournalWrite, WriteKind};
pub use fault::{FaultPoint, InjectedFault};

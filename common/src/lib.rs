//! AtomicDoc Common Types
//!
//! This crate contains shared types used across AtomicDoc, including
//! identifiers, the error taxonomy, transaction options and the traits a
//! document store implements to take part in coordinated transactions.

pub mod identifiers;
pub mod error;
pub mod options;
pub mod store;
pub mod time;

pub use identifiers::*;
pub use error::*;
pub use options::*;
pub use store::*;
pub use time::*;

/// Re-exported so callers build filters and payloads with the same BSON types
/// the store traits use.
pub use bson::{self, doc, Bson, Document};

//! AtomicDoc MongoDB Adapter
//!
//! Implements the document-store traits over the official driver. Each scope
//! owns a client session with an active multi-document transaction; driver
//! errors are normalized into the shared store error taxonomy.

pub mod connection;
pub mod error;
pub mod options;
pub mod store;

pub use connection::{Connection, PoolConfig};
pub use error::store_error;
pub use store::{MongoScope, MongoStore};

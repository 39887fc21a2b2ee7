//! Driver error classification.
//!
//! The driver reports server failures as numeric codes plus labels. They are
//! folded into [`StoreError`] here so nothing above this crate sees a driver
//! type.

use mongodb::error::{Error, ErrorKind, WriteFailure, TRANSIENT_TRANSACTION_ERROR};

use atomicdoc_common::StoreError;

/// Server error codes the adapter distinguishes.
pub mod codes {
    pub const HOST_UNREACHABLE: i32 = 6;
    pub const HOST_NOT_FOUND: i32 = 7;
    pub const UNAUTHORIZED: i32 = 13;
    pub const AUTHENTICATION_FAILED: i32 = 18;
    pub const NAMESPACE_NOT_FOUND: i32 = 26;
    pub const NETWORK_TIMEOUT: i32 = 89;
    pub const SHUTDOWN_IN_PROGRESS: i32 = 91;
    pub const WRITE_CONFLICT: i32 = 112;
    pub const DOCUMENT_VALIDATION_FAILURE: i32 = 121;
    pub const PRIMARY_STEPPED_DOWN: i32 = 189;
    pub const DUPLICATE_KEY: i32 = 11000;
    pub const NOT_WRITABLE_PRIMARY: i32 = 10107;
}

/// Convert a driver error raised while working on `collection`.
pub fn store_error(error: Error, collection: &str) -> StoreError {
    let transient = error.contains_label(TRANSIENT_TRANSACTION_ERROR);

    match error.kind.as_ref() {
        ErrorKind::Command(command) => {
            classify(Some(command.code), transient, &command.message, collection)
        }
        ErrorKind::Write(WriteFailure::WriteError(write)) => {
            classify(Some(write.code), transient, &write.message, collection)
        }
        ErrorKind::Write(WriteFailure::WriteConcernError(concern)) => {
            classify(Some(concern.code), transient, &concern.message, collection)
        }
        ErrorKind::Authentication { message, .. } => StoreError::Authentication(message.clone()),
        ErrorKind::Io(io) => StoreError::Network(io.to_string()),
        ErrorKind::ServerSelection { message, .. } => StoreError::Connection(message.clone()),
        ErrorKind::InvalidArgument { message, .. } => StoreError::InvalidOperation(message.clone()),
        _ => classify(None, transient, &error.to_string(), collection),
    }
}

/// Map a server code and the transient label onto a store error.
///
/// Specific codes win over the label: a write conflict stays a write
/// conflict even though the server also tags it transient.
pub fn classify(
    code: Option<i32>,
    transient: bool,
    message: &str,
    collection: &str,
) -> StoreError {
    let message = message.to_string();
    match code {
        Some(codes::DOCUMENT_VALIDATION_FAILURE) => StoreError::ValidationFailed {
            collection: collection.to_string(),
            message,
        },
        Some(codes::DUPLICATE_KEY) => StoreError::DuplicateKey {
            collection: collection.to_string(),
            key: message,
        },
        Some(codes::NAMESPACE_NOT_FOUND) => StoreError::NamespaceNotFound(collection.to_string()),
        Some(codes::AUTHENTICATION_FAILED | codes::UNAUTHORIZED) => {
            StoreError::Authentication(message)
        }
        Some(codes::WRITE_CONFLICT) => StoreError::WriteConflict {
            collection: collection.to_string(),
            message,
        },
        Some(
            codes::HOST_UNREACHABLE
            | codes::HOST_NOT_FOUND
            | codes::NETWORK_TIMEOUT
            | codes::SHUTDOWN_IN_PROGRESS
            | codes::PRIMARY_STEPPED_DOWN
            | codes::NOT_WRITABLE_PRIMARY,
        ) => StoreError::Network(message),
        _ if transient => StoreError::TransientTransaction(message),
        _ => StoreError::Internal(message),
    }
}

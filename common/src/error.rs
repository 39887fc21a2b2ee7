//! Error types for AtomicDoc.
//!
//! Two layers: [`StoreError`] is what a document store reports for a single
//! operation, [`TransactionError`] is the normalized taxonomy the coordinator
//! hands back to callers. Callers never see a raw driver error.

use thiserror::Error;

/// Errors reported by a document store or one of its scopes.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No usable connection to the store.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Network blip while talking to the store.
    #[error("Network error: {0}")]
    Network(String),

    /// The store flagged the transaction as transient (safe to rerun).
    #[error("Transient transaction error: {0}")]
    TransientTransaction(String),

    /// Another transaction wrote the same document first.
    #[error("Write conflict in {collection}: {message}")]
    WriteConflict { collection: String, message: String },

    /// Collection does not exist.
    #[error("Collection not found: {0}")]
    NamespaceNotFound(String),

    /// Document rejected by a collection validator.
    #[error("Document failed validation in {collection}: {message}")]
    ValidationFailed { collection: String, message: String },

    /// Unique index violation.
    #[error("Duplicate key in {collection}: {key}")]
    DuplicateKey { collection: String, key: String },

    /// Malformed filter/update, or an operation on a resolved scope.
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Credentials rejected.
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Anything else the backend reports.
    #[error("Store error: {0}")]
    Internal(String),
}

impl StoreError {
    /// Check if rerunning the whole transaction may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            StoreError::Network(_)
                | StoreError::TransientTransaction(_)
                | StoreError::WriteConflict { .. }
        )
    }

    /// Get a stable error code for logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "CONNECTION_ERROR",
            StoreError::Network(_) => "NETWORK_ERROR",
            StoreError::TransientTransaction(_) => "TRANSIENT_TRANSACTION_ERROR",
            StoreError::WriteConflict { .. } => "WRITE_CONFLICT",
            StoreError::NamespaceNotFound(_) => "NAMESPACE_NOT_FOUND",
            StoreError::ValidationFailed { .. } => "DOCUMENT_VALIDATION_FAILURE",
            StoreError::DuplicateKey { .. } => "DUPLICATE_KEY",
            StoreError::InvalidOperation(_) => "INVALID_OPERATION",
            StoreError::Authentication(_) => "AUTHENTICATION_FAILED",
            StoreError::Internal(_) => "STORE_ERROR",
        }
    }
}

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Normalized error taxonomy surfaced by the coordinator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    /// A post-condition or conflict check vetoed the plan.
    #[error("Step '{step}' aborted the transaction: {reason}")]
    PolicyAbort {
        step: String,
        step_index: usize,
        reason: String,
    },

    /// Transient store failure that outlived the retry budget.
    #[error("Transient store error after {attempts} attempt(s): {source}")]
    TransientStore {
        attempts: u32,
        #[source]
        source: StoreError,
    },

    /// Store failure that retrying cannot fix.
    #[error("{0}")]
    PermanentStore(#[source] StoreError),

    /// Caller deadline exceeded; the scope was aborted.
    #[error("Deadline exceeded during {operation} after {elapsed_ms}ms")]
    Timeout { operation: String, elapsed_ms: u64 },

    /// Plan rejected before a scope was opened.
    #[error("Precondition failed: {0}")]
    Precondition(String),
}

impl TransactionError {
    /// Check if this error belongs to the retryable category.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransactionError::TransientStore { .. })
    }

    /// Get error code for logs and outcome summaries.
    pub fn error_code(&self) -> &'static str {
        match self {
            TransactionError::PolicyAbort { .. } => "POLICY_ABORT",
            TransactionError::TransientStore { .. } => "TRANSIENT_STORE_ERROR",
            TransactionError::PermanentStore(_) => "PERMANENT_STORE_ERROR",
            TransactionError::Timeout { .. } => "TIMEOUT",
            TransactionError::Precondition(_) => "PRECONDITION_FAILED",
        }
    }

    /// Check if this error was caused by the caller's deadline.
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransactionError::Timeout { .. })
    }

    /// The underlying store error, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            TransactionError::TransientStore { source, .. } => Some(source),
            TransactionError::PermanentStore(source) => Some(source),
            _ => None,
        }
    }
}

impl From<StoreError> for TransactionError {
    fn from(error: StoreError) -> Self {
        if error.is_transient() {
            TransactionError::TransientStore {
                attempts: 1,
                source: error,
            }
        } else {
            TransactionError::PermanentStore(error)
        }
    }
}

/// Result type alias for coordinator operations.
pub type Result<T> = std::result::Result<T, TransactionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(StoreError::Network("reset".into()).is_transient());
        assert!(StoreError::WriteConflict {
            collection: "accounts".into(),
            message: "account1".into(),
        }
        .is_transient());
        assert!(!StoreError::ValidationFailed {
            collection: "accounts".into(),
            message: "balance".into(),
        }
        .is_transient());
        assert!(!StoreError::Connection("closed".into()).is_transient());
    }

    #[test]
    fn test_store_error_normalization() {
        let err: TransactionError = StoreError::TransientTransaction("retry".into()).into();
        assert!(err.is_retryable());
        assert_eq!(err.error_code(), "TRANSIENT_STORE_ERROR");

        let err: TransactionError = StoreError::Authentication("bad password".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(
            err.store_error(),
            Some(&StoreError::Authentication("bad password".into()))
        );
    }

    #[test]
    fn test_display_is_one_line() {
        let err = TransactionError::PolicyAbort {
            step: "debit-source".into(),
            step_index: 0,
            reason: "expected modified_count == 1, got 0".into(),
        };
        assert!(!err.to_string().contains('\n'));
        assert!(err.to_string().contains("debit-source"));
    }
}

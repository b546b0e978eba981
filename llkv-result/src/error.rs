use std::{fmt, io};
use thiserror::Error;

/// Unified error type for all LLKV operations.
///
/// This enum encompasses all failure modes across the stack, from low-level object
/// store errors to commit-time transaction conflicts. Each variant includes
/// context-specific information to help diagnose and handle the error appropriately.
///
/// # Error Handling Strategy
///
/// Errors propagate upward through the call stack using Rust's `?` operator. Callers
/// driving transactions should branch on [`Error::is_retryable`]: conflicts mean the
/// whole transaction can be re-run, everything else is reported as is.
///
/// # Thread Safety
///
/// `Error` implements `Send` and `Sync`, allowing errors to be safely passed between threads.
/// This is important because transactions commit concurrently from many threads.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error during file or disk operations.
    ///
    /// The underlying `io::Error` provides detailed information about the failure
    /// (e.g., permission denied, disk full, file not found).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Arrow library error during columnar data operations.
    ///
    /// This error occurs when:
    /// - Building Arrow arrays with invalid data
    /// - Concatenating, filtering or sorting batches
    /// - Schema mismatches during batch operations
    ///
    /// Arrow is the in-memory columnar format of every object block, so these errors
    /// typically indicate data format incompatibilities.
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Invalid user input or API parameter.
    ///
    /// This error indicates a problem with arguments passed to LLKV APIs:
    /// - Batches whose schema does not match the table
    /// - Primary key columns containing NULL or using an unsupported type
    /// - Row identities that do not reference a committed object
    /// - Commit timestamps that would move the commit clock backwards
    ///
    /// # Recovery
    ///
    /// These errors are typically recoverable. Fix the input and retry the operation.
    #[error("Invalid argument: {0}")]
    InvalidArgumentError(String),

    /// Row or object not found.
    ///
    /// Returned when a primary-key lookup finds no live row visible to the
    /// transaction, or when a storage object has already been removed.
    #[error("Storage key not found")]
    NotFound,

    /// Catalog metadata error.
    ///
    /// This error indicates a problem with catalog lookups:
    /// - Unknown database or table identifiers
    /// - Object entries that are missing from a table
    #[error("{0}")]
    CatalogError(String),

    /// Primary key uniqueness violation.
    ///
    /// Raised when an appended key collides with another key in the same batch, a
    /// key already staged by the transaction, a committed key visible to the
    /// transaction, or a key committed concurrently while the transaction was open.
    /// Also raised when the same key is deleted twice in one transaction.
    ///
    /// # Recovery
    ///
    /// Not retryable: re-running the transaction reproduces the duplicate.
    #[error("Duplicate entry '{value}' for key '{column}'")]
    DuplicateEntry { value: String, column: String },

    /// Read-write conflict detected by optimistic validation.
    ///
    /// An object the transaction read or deleted from was dropped by a concurrent
    /// commit in a way the transaction cannot reconcile, or the transfer page needed
    /// to follow a relocated row has already been evicted.
    ///
    /// # Recovery
    ///
    /// Retryable: the transaction should be re-run from the beginning.
    #[error("Read-write conflict: {0}")]
    ReadWriteConflict(String),

    /// Write-write conflict detected by optimistic validation.
    ///
    /// Another transaction committed a delete of the same row, or a relocated row
    /// could not be followed within the configured number of transfer hops.
    ///
    /// # Recovery
    ///
    /// Retryable: the transaction should be re-run from the beginning.
    #[error("Write-write conflict: {0}")]
    WriteWriteConflict(String),

    /// Transaction lifecycle error.
    ///
    /// This error occurs when an operation is not permitted in the current
    /// transaction state, for example appending after commit has started.
    #[error("{0}")]
    TransactionContextError(String),

    /// Internal error indicating a bug or unexpected state.
    ///
    /// This error should never occur during normal operation. It indicates:
    /// - Violated internal invariants
    /// - Unexpected state transitions
    /// - Data structure corruption
    ///
    /// # Debugging
    ///
    /// The message includes details about what assertion failed or what unexpected
    /// state was encountered. Enable debug logging for more context.
    #[error("An internal operation failed: {0}")]
    Internal(String),

    /// Unrecoverable invariant violation.
    ///
    /// Raised when a commit can no longer be completed or undone, for example when
    /// the commit log no longer knows a transaction that has already been prepared.
    /// The payload is the rendered diagnostic snapshot of the transaction.
    ///
    /// # Recovery
    ///
    /// None in-process. The owning database refuses further work and the host is
    /// expected to restart it.
    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl Error {
    /// Create a duplicate-entry error for a primary key value.
    ///
    /// # Examples
    ///
    /// ```
    /// use llkv_result::Error;
    ///
    /// let err = Error::duplicate_entry(5, "id");
    /// assert_eq!(err.to_string(), "Duplicate entry '5' for key 'id'");
    /// ```
    #[inline]
    pub fn duplicate_entry(value: impl fmt::Display, column: impl Into<String>) -> Self {
        Error::DuplicateEntry {
            value: value.to_string(),
            column: column.into(),
        }
    }

    /// Whether re-running the whole transaction may succeed.
    ///
    /// ```
    /// use llkv_result::Error;
    ///
    /// assert!(Error::WriteWriteConflict("row deleted".into()).is_retryable());
    /// assert!(!Error::duplicate_entry("a", "name").is_retryable());
    /// ```
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ReadWriteConflict(_) | Error::WriteWriteConflict(_)
        )
    }

    #[inline]
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Error::DuplicateEntry { .. })
    }

    #[inline]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

//! Error types and result definitions for the LLKV transactional table core.
//!
//! This crate provides the unified error type ([`Error`]) and result type alias
//! ([`Result<T>`]) used by every crate in the workspace. All operations that could
//! fail return `Result<T>`, where the error variant describes what went wrong and
//! whether the caller may retry.
//!
//! # Error Categories
//!
//! - **I/O errors** ([`Error::Io`]): Disk operations, file access
//! - **Data format errors** ([`Error::Arrow`]): Arrow batch construction and schema issues
//! - **Lookup failures** ([`Error::NotFound`]): Missing rows or objects
//! - **User input errors** ([`Error::InvalidArgumentError`]): Bad parameters, schema mismatches
//! - **Duplicate keys** ([`Error::DuplicateEntry`]): Primary key uniqueness violations
//! - **Concurrency conflicts** ([`Error::ReadWriteConflict`], [`Error::WriteWriteConflict`]):
//!   Optimistic validation failures; the transaction may be retried
//! - **Transaction errors** ([`Error::TransactionContextError`]): Invalid lifecycle transitions
//! - **Catalog errors** ([`Error::CatalogError`]): Unknown tables or inconsistent metadata
//! - **Internal errors** ([`Error::Internal`]): Bugs or unexpected states
//! - **Fatal errors** ([`Error::Fatal`]): Invariant violations after the point of no return

pub mod error;
pub mod result;

pub use error::Error;
pub use result::Result;

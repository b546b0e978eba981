//! Storage collaborators of the LLKV transactional table core.
//!
//! This crate owns everything a transaction reads or publishes but does not own
//! itself:
//!
//! - [`store`]: versioned columnar objects behind the [`ObjectStore`] trait, with an
//!   in-memory implementation ([`MemObjectStore`]).
//! - [`catalog`]: tables and the MVCC lifetime (`created_at` / `dropped_at`) of
//!   every object they own.
//! - [`zonemap`] and [`bloom`]: primary key pruning statistics.
//! - [`transfer`]: pinned, TTL-bounded transfer pages published by merges.
//! - [`visibility`]: primary key lookups, tombstone probes and snapshot scans.
//! - [`merge`]: the merge task that relocates rows and publishes transfer pages.
//!
//! [`Storage`] bundles the catalog, object store and transfer table of one
//! database.

pub mod bloom;
pub mod catalog;
pub mod config;
pub mod constants;
pub mod keys;
pub mod merge;
pub mod object;
pub mod schema;
pub mod storage;
pub mod store;
pub mod transfer;
pub mod visibility;
pub mod writer;
pub mod zonemap;

pub use catalog::{Catalog, ObjectEntry, ObjectOrigin, TableEntry};
pub use config::StorageConfig;
pub use keys::{PkValue, pk_array, pk_values};
pub use merge::{MergeOutcome, merge_objects};
pub use object::{ObjectData, ObjectSpec, ObjectStats};
pub use schema::TableSchema;
pub use storage::Storage;
pub use store::{MemObjectStore, ObjectStore};
pub use transfer::{PinnedPage, TransferPage, TransferTable};
pub use visibility::{
    CommittedTombstone, PkMatch, ScanBatch, ScanWindow, find_deletes, find_pk_rows,
    scan_tombstones, scan_visible,
};
pub use writer::ObjectWriter;
pub use zonemap::ZoneMap;

//! Identifier and timestamp types shared across LLKV crates.
//!
//! Everything here is plain data: no storage or transaction logic, so the
//! result, storage and transaction crates can all agree on how objects, rows and
//! commit times are named.

pub mod ids;
pub mod kind;

pub use ids::{DbId, ObjectId, RowIdentity, TableId};
pub use kind::DataKind;

/// Transaction ID type.
pub type TxnId = u64;

/// Logical commit/read timestamp.
///
/// Timestamps are allocated from a single monotonically increasing clock. A row or
/// object committed at `t` is visible to every read at `t` or later.
pub type Timestamp = u64;

/// Smallest timestamp; nothing is ever committed at it.
pub const TS_ZERO: Timestamp = 0;

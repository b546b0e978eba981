//! Identifiers for databases, tables, objects and rows.
//!
//! Row identities are physical: they name the object, block and offset a row
//! currently lives at. Compaction relocates rows, so a [`RowIdentity`] is only
//! meaningful together with the object's MVCC lifetime and the transfer pages
//! published when the object was merged away.

use std::fmt;

/// Unique identifier for a database.
pub type DbId = u32;

/// Unique identifier for a table within a database.
///
/// Table IDs are allocated by the catalog starting from `1`.
pub type TableId = u32;

/// 128-bit identity of an immutable columnar object.
///
/// Object identities are never reused, including after the object has been
/// dropped by compaction, so a dangling reference always resolves to "missing"
/// rather than to unrelated data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u128);

impl ObjectId {
    /// Number of bytes in the big-endian encoding.
    pub const ENCODED_LEN: usize = 16;

    #[inline]
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u128(self) -> u128 {
        self.0
    }

    #[inline]
    pub fn to_be_bytes(self) -> [u8; Self::ENCODED_LEN] {
        self.0.to_be_bytes()
    }

    #[inline]
    pub fn from_be_bytes(bytes: [u8; Self::ENCODED_LEN]) -> Self {
        Self(u128::from_be_bytes(bytes))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hi = (self.0 >> 64) as u64;
        let lo = self.0 as u64;
        write!(f, "{hi:016x}-{lo:016x}")
    }
}

/// Physical location of a row: `(object, block, offset)`.
///
/// Encoded as 24 bytes: the 16-byte big-endian object id followed by the
/// big-endian block sequence and row offset. Tombstones persist this encoding in a
/// fixed-width binary column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RowIdentity {
    pub object: ObjectId,
    pub block: u32,
    pub offset: u32,
}

impl RowIdentity {
    /// Width of the fixed-size binary encoding.
    pub const ENCODED_LEN: usize = ObjectId::ENCODED_LEN + 8;

    #[inline]
    pub const fn new(object: ObjectId, block: u32, offset: u32) -> Self {
        Self {
            object,
            block,
            offset,
        }
    }

    pub fn to_bytes(&self) -> [u8; Self::ENCODED_LEN] {
        let mut out = [0u8; Self::ENCODED_LEN];
        out[..16].copy_from_slice(&self.object.to_be_bytes());
        out[16..20].copy_from_slice(&self.block.to_be_bytes());
        out[20..24].copy_from_slice(&self.offset.to_be_bytes());
        out
    }

    /// Decode a row identity; `None` when `bytes` is not exactly 24 bytes long.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::ENCODED_LEN {
            return None;
        }
        let object = ObjectId::from_be_bytes(bytes[..16].try_into().ok()?);
        let block = u32::from_be_bytes(bytes[16..20].try_into().ok()?);
        let offset = u32::from_be_bytes(bytes[20..24].try_into().ok()?);
        Some(Self::new(object, block, offset))
    }
}

impl fmt::Display for RowIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.object, self.block, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_identity_encoding_is_ordered_like_the_tuple() {
        let a = RowIdentity::new(ObjectId::new(1), 0, 9);
        let b = RowIdentity::new(ObjectId::new(1), 1, 0);
        let c = RowIdentity::new(ObjectId::new(2), 0, 0);
        assert!(a.to_bytes() < b.to_bytes());
        assert!(b.to_bytes() < c.to_bytes());
        assert_eq!(RowIdentity::from_bytes(&b.to_bytes()), Some(b));
    }

    #[test]
    fn test_row_identity_rejects_wrong_width() {
        assert_eq!(RowIdentity::from_bytes(&[0u8; 23]), None);
        assert_eq!(RowIdentity::from_bytes(&[0u8; 25]), None);
    }

    #[test]
    fn test_object_id_display() {
        let id = ObjectId::new((7u128 << 64) | 42);
        assert_eq!(id.to_string(), "0000000000000007-000000000000002a");
    }
}

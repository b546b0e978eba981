use std::fmt;

/// Which lineage of a table an object or staged batch belongs to.
///
/// Row data and tombstones are stored in parallel object lineages. Tombstone
/// objects carry `(primary_key, row_identity)` pairs addressed against the data
/// lineage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DataKind {
    Data,
    Tombstone,
}

impl DataKind {
    #[inline]
    pub fn is_tombstone(self) -> bool {
        matches!(self, DataKind::Tombstone)
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataKind::Data => f.write_str("data"),
            DataKind::Tombstone => f.write_str("tombstone"),
        }
    }
}

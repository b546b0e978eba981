use std::time::Duration;

use crate::constants::{
    DEFAULT_APPENDABLE_OBJECT_MAX_ROWS, DEFAULT_BLOCK_MAX_ROWS, DEFAULT_TRANSFER_TTL_SECS,
};

/// Tunables of the storage layer.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Maximum rows per physical block of every object.
    pub block_max_rows: usize,
    /// Rows an appendable object accepts before it is sealed and a new one opened.
    pub appendable_object_max_rows: usize,
    /// How long an unpinned transfer page survives after its last use.
    pub transfer_ttl: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            block_max_rows: DEFAULT_BLOCK_MAX_ROWS,
            appendable_object_max_rows: DEFAULT_APPENDABLE_OBJECT_MAX_ROWS,
            transfer_ttl: Duration::from_secs(DEFAULT_TRANSFER_TTL_SECS),
        }
    }
}

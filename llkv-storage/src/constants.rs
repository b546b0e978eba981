/// Name of the row identity column in tombstone batches.
pub const ROW_ID_COLUMN_NAME: &str = "__rowid";

/// Column position of the primary key in tombstone batches.
pub const TOMBSTONE_PK_COLUMN: usize = 0;

/// Column position of the row identity in tombstone batches.
pub const TOMBSTONE_ROWID_COLUMN: usize = 1;

/// Default number of rows per physical block.
pub const DEFAULT_BLOCK_MAX_ROWS: usize = 8192;

/// Default number of rows an appendable object accepts before it is frozen.
pub const DEFAULT_APPENDABLE_OBJECT_MAX_ROWS: usize = 8 * DEFAULT_BLOCK_MAX_ROWS;

/// Default time an unpinned transfer page survives after its last use.
pub const DEFAULT_TRANSFER_TTL_SECS: u64 = 60;

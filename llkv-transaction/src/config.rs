use llkv_storage::StorageConfig;

/// Default number of staged rows after which a staging area seals its batch.
pub const DEFAULT_WORKSPACE_FLUSH_ROWS: usize = 8192;

/// Default bound on transfer pages followed for one delete.
pub const DEFAULT_MAX_TRANSFER_HOPS: usize = 32;

/// Which primary-key dedup tiers a transaction table checks, and when.
///
/// | policy             | at append                         | at prepare                                   |
/// |--------------------|-----------------------------------|----------------------------------------------|
/// | `CheckAll`         | batch, workspace, snapshot        | source persisted, newly committed            |
/// | `SkipWorkspace`    | batch, snapshot                   | source persisted, newly committed            |
/// | `CheckIncremental` | batch, workspace                  | source persisted, snapshot at prepare        |
/// | `SkipAll`          | batch                             | nothing                                      |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DedupPolicy {
    #[default]
    CheckAll,
    SkipWorkspace,
    CheckIncremental,
    SkipAll,
}

impl DedupPolicy {
    #[inline]
    pub fn checks_workspace_on_append(self) -> bool {
        matches!(self, DedupPolicy::CheckAll | DedupPolicy::CheckIncremental)
    }

    #[inline]
    pub fn checks_snapshot_on_append(self) -> bool {
        matches!(self, DedupPolicy::CheckAll | DedupPolicy::SkipWorkspace)
    }

    #[inline]
    pub fn checks_on_prepare(self) -> bool {
        !matches!(self, DedupPolicy::SkipAll)
    }

    /// The committed snapshot was skipped at append and is probed in full at prepare.
    #[inline]
    pub fn defers_snapshot(self) -> bool {
        matches!(self, DedupPolicy::CheckIncremental)
    }
}

/// Transaction tunables.
#[derive(Debug, Clone)]
pub struct TxnConfig {
    /// Dedup policy of newly opened transaction tables.
    pub dedup_policy: DedupPolicy,
    /// Staged rows per kind before the in-memory batch is sealed into an object.
    pub workspace_flush_rows: usize,
    /// Transfer pages one delete may be followed through before the commit fails
    /// with a write-write conflict.
    pub max_transfer_hops: usize,
}

impl Default for TxnConfig {
    fn default() -> Self {
        Self {
            dedup_policy: DedupPolicy::default(),
            workspace_flush_rows: DEFAULT_WORKSPACE_FLUSH_ROWS,
            max_transfer_hops: DEFAULT_MAX_TRANSFER_HOPS,
        }
    }
}

/// Configuration of a [`Database`](crate::Database).
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
    pub storage: StorageConfig,
    pub txn: TxnConfig,
}

use std::sync::Arc;

use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_types::{DataKind, DbId, ObjectId, TableId, Timestamp};

use crate::catalog::{Catalog, ObjectEntry, ObjectOrigin, TableEntry};
use crate::config::StorageConfig;
use crate::constants::TOMBSTONE_PK_COLUMN;
use crate::object::{ObjectSpec, ObjectStats};
use crate::schema::TableSchema;
use crate::store::{MemObjectStore, ObjectStore};
use crate::transfer::TransferTable;

/// The shared storage collaborators of a database: catalog, object store and
/// transfer table.
pub struct Storage {
    catalog: Catalog,
    store: Arc<dyn ObjectStore>,
    transfer: TransferTable,
    config: StorageConfig,
}

impl Default for Storage {
    fn default() -> Self {
        Self::new(StorageConfig::default())
    }
}

impl Storage {
    pub fn new(config: StorageConfig) -> Self {
        Self::with_store(Arc::new(MemObjectStore::new()), config)
    }

    pub fn with_store(store: Arc<dyn ObjectStore>, config: StorageConfig) -> Self {
        Self {
            catalog: Catalog::new(),
            store,
            transfer: TransferTable::new(config.transfer_ttl),
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn store(&self) -> &dyn ObjectStore {
        self.store.as_ref()
    }

    pub fn transfer_table(&self) -> &TransferTable {
        &self.transfer
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn create_table(&self, db: DbId, schema: TableSchema) -> LlkvResult<Arc<TableEntry>> {
        self.catalog.create_table(db, schema)
    }

    pub fn table(&self, db: DbId, table: TableId) -> LlkvResult<Arc<TableEntry>> {
        self.catalog.table(db, table)
    }

    /// Object layout for `kind` objects of `table`.
    pub fn object_spec(&self, table: &TableEntry, kind: DataKind, track_row_ts: bool) -> ObjectSpec {
        let (schema, pk_index) = match kind {
            DataKind::Data => (
                Arc::clone(table.schema().schema()),
                table.schema().pk_index(),
            ),
            DataKind::Tombstone => (
                Arc::clone(table.schema().tombstone_schema()),
                TOMBSTONE_PK_COLUMN,
            ),
        };
        ObjectSpec {
            kind,
            schema,
            pk_index,
            block_max_rows: self.config.block_max_rows,
            track_row_ts,
        }
    }

    /// Make a sealed object visible from `created_at` on.
    pub fn register_object(
        &self,
        table: &TableEntry,
        stats: &ObjectStats,
        created_at: Timestamp,
        origin: ObjectOrigin,
    ) -> LlkvResult<()> {
        if !self.store.contains(stats.id) {
            return Err(Error::Internal(format!(
                "cannot register object {}: not present in the object store",
                stats.id
            )));
        }
        table.create_object(ObjectEntry {
            id: stats.id,
            kind: stats.kind,
            created_at,
            dropped_at: None,
            origin,
            open: false,
        })
    }

    /// Append committed rows into the table's appendable object of `kind`,
    /// stamping each row with `commit_ts`.
    ///
    /// The appendable object is sealed once it holds
    /// [`StorageConfig::appendable_object_max_rows`] rows; the next append opens a
    /// fresh one.
    pub fn append_committed(
        &self,
        table: &TableEntry,
        kind: DataKind,
        batch: &RecordBatch,
        commit_ts: Timestamp,
    ) -> LlkvResult<()> {
        let max_rows = self.config.appendable_object_max_rows.max(1);
        let mut offset = 0;
        while offset < batch.num_rows() {
            let (id, held) = self.open_appendable(table, kind, commit_ts)?;
            let take = (max_rows - held).min(batch.num_rows() - offset);
            self.store
                .append(id, &batch.slice(offset, take), Some(commit_ts))?;
            offset += take;
            if held + take >= max_rows {
                self.store.seal(id)?;
                table.close_open_object(kind, id);
            }
        }
        Ok(())
    }

    fn open_appendable(
        &self,
        table: &TableEntry,
        kind: DataKind,
        commit_ts: Timestamp,
    ) -> LlkvResult<(ObjectId, usize)> {
        let max_rows = self.config.appendable_object_max_rows.max(1);
        if let Some(id) = table.open_object(kind) {
            let held = self.store.snapshot(id)?.row_count();
            if held < max_rows {
                return Ok((id, held));
            }
            self.store.seal(id)?;
            table.close_open_object(kind, id);
        }
        let id = self
            .store
            .create_object(self.object_spec(table, kind, true))?;
        table.create_object(ObjectEntry {
            id,
            kind,
            created_at: commit_ts,
            dropped_at: None,
            origin: ObjectOrigin::Txn,
            open: true,
        })?;
        table.set_open_object(kind, id);
        tracing::debug!(
            "[STORAGE] table '{}' opened appendable {kind} object {id} at ts {commit_ts}",
            table.name()
        );
        Ok((id, 0))
    }
}

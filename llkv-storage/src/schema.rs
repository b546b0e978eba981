//! Table schemas and the tombstone batch layout derived from them.

use std::sync::Arc;

use arrow::array::{Array, ArrayRef, FixedSizeBinaryArray, FixedSizeBinaryBuilder};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use llkv_result::{Error, Result as LlkvResult};
use llkv_types::RowIdentity;

use crate::constants::{ROW_ID_COLUMN_NAME, TOMBSTONE_PK_COLUMN, TOMBSTONE_ROWID_COLUMN};
use crate::keys::{PkValue, is_supported_pk_type, pk_array, pk_values};

/// Schema of a table: its Arrow columns and which one is the primary key.
#[derive(Debug, Clone)]
pub struct TableSchema {
    name: String,
    schema: SchemaRef,
    pk_index: usize,
    tombstone_schema: SchemaRef,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, schema: SchemaRef, pk_index: usize) -> LlkvResult<Self> {
        let name = name.into();
        let pk_field = schema.fields().get(pk_index).ok_or_else(|| {
            Error::InvalidArgumentError(format!(
                "primary key index {pk_index} out of range for table '{name}'"
            ))
        })?;
        if !is_supported_pk_type(pk_field.data_type()) {
            return Err(Error::InvalidArgumentError(format!(
                "column '{}' of type {:?} cannot be a primary key",
                pk_field.name(),
                pk_field.data_type()
            )));
        }
        if pk_field.name() == ROW_ID_COLUMN_NAME {
            return Err(Error::InvalidArgumentError(format!(
                "column name '{ROW_ID_COLUMN_NAME}' is reserved"
            )));
        }
        let tombstone_schema = Arc::new(Schema::new(vec![
            Field::new(pk_field.name(), pk_field.data_type().clone(), false),
            Field::new(
                ROW_ID_COLUMN_NAME,
                DataType::FixedSizeBinary(RowIdentity::ENCODED_LEN as i32),
                false,
            ),
        ]));
        Ok(Self {
            name,
            schema,
            pk_index,
            tombstone_schema,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &SchemaRef {
        &self.schema
    }

    pub fn pk_index(&self) -> usize {
        self.pk_index
    }

    pub fn pk_name(&self) -> &str {
        self.schema.field(self.pk_index).name()
    }

    pub fn pk_type(&self) -> &DataType {
        self.schema.field(self.pk_index).data_type()
    }

    pub fn tombstone_schema(&self) -> &SchemaRef {
        &self.tombstone_schema
    }

    /// Check that `batch` carries the table's columns, by name and type, in order.
    pub fn validate_batch(&self, batch: &RecordBatch) -> LlkvResult<()> {
        let expected = self.schema.fields();
        let actual = batch.schema();
        if actual.fields().len() != expected.len() {
            return Err(Error::InvalidArgumentError(format!(
                "table '{}' expects {} columns, batch has {}",
                self.name,
                expected.len(),
                actual.fields().len()
            )));
        }
        for (want, got) in expected.iter().zip(actual.fields().iter()) {
            if want.name() != got.name() || want.data_type() != got.data_type() {
                return Err(Error::InvalidArgumentError(format!(
                    "table '{}' column '{}' ({:?}) does not match batch column '{}' ({:?})",
                    self.name,
                    want.name(),
                    want.data_type(),
                    got.name(),
                    got.data_type()
                )));
            }
        }
        Ok(())
    }

    /// Rebind `batch` to the table schema so field metadata and nullability agree.
    pub fn rebind(&self, batch: &RecordBatch) -> LlkvResult<RecordBatch> {
        self.validate_batch(batch)?;
        Ok(RecordBatch::try_new(
            Arc::clone(&self.schema),
            batch.columns().to_vec(),
        )?)
    }

    /// Build a tombstone batch from parallel key / row identity slices.
    pub fn tombstone_batch(
        &self,
        keys: &[PkValue],
        rows: &[RowIdentity],
    ) -> LlkvResult<RecordBatch> {
        if keys.len() != rows.len() {
            return Err(Error::InvalidArgumentError(format!(
                "tombstone batch needs one row identity per key ({} keys, {} rows)",
                keys.len(),
                rows.len()
            )));
        }
        let pk = pk_array(self.pk_type(), keys)?;
        let rowids = row_identity_array(rows)?;
        Ok(RecordBatch::try_new(
            Arc::clone(&self.tombstone_schema),
            vec![pk, rowids],
        )?)
    }
}

/// Encode row identities into a `FixedSizeBinary(24)` array.
pub fn row_identity_array(rows: &[RowIdentity]) -> LlkvResult<ArrayRef> {
    let mut builder =
        FixedSizeBinaryBuilder::with_capacity(rows.len(), RowIdentity::ENCODED_LEN as i32);
    for row in rows {
        builder.append_value(row.to_bytes())?;
    }
    Ok(Arc::new(builder.finish()))
}

/// Decode a `FixedSizeBinary(24)` array of row identities.
pub fn row_identities(array: &dyn Array) -> LlkvResult<Vec<RowIdentity>> {
    let binary = array
        .as_any()
        .downcast_ref::<FixedSizeBinaryArray>()
        .ok_or_else(|| {
            Error::Internal(format!(
                "row identity column has type {:?}",
                array.data_type()
            ))
        })?;
    (0..binary.len())
        .map(|i| {
            RowIdentity::from_bytes(binary.value(i)).ok_or_else(|| {
                Error::Internal(format!("malformed row identity at position {i}"))
            })
        })
        .collect()
}

/// Split a tombstone batch back into its keys and row identities.
pub fn read_tombstones(batch: &RecordBatch) -> LlkvResult<(Vec<PkValue>, Vec<RowIdentity>)> {
    let keys = pk_values(batch.column(TOMBSTONE_PK_COLUMN).as_ref())?;
    let rows = row_identities(batch.column(TOMBSTONE_ROWID_COLUMN).as_ref())?;
    Ok((keys, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use llkv_types::ObjectId;

    fn users() -> TableSchema {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        TableSchema::new("users", schema, 0).unwrap()
    }

    #[test]
    fn test_tombstone_batch_layout() {
        let table = users();
        let rows = vec![
            RowIdentity::new(ObjectId::new(3), 0, 1),
            RowIdentity::new(ObjectId::new(4), 2, 0),
        ];
        let keys = vec![PkValue::Int(10), PkValue::Int(11)];
        let batch = table.tombstone_batch(&keys, &rows).unwrap();
        assert_eq!(batch.schema().field(0).name(), "id");
        assert_eq!(batch.schema().field(1).name(), ROW_ID_COLUMN_NAME);

        let (read_keys, read_rows) = read_tombstones(&batch).unwrap();
        assert_eq!(read_keys, keys);
        assert_eq!(read_rows, rows);
    }

    #[test]
    fn test_empty_tombstone_batch() {
        let batch = users().tombstone_batch(&[], &[]).unwrap();
        assert_eq!(batch.num_rows(), 0);
    }

    #[test]
    fn test_validate_batch_rejects_mismatched_columns() {
        let table = users();
        let other = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("email", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            other,
            vec![
                Arc::new(Int64Array::from(vec![1])),
                Arc::new(StringArray::from(vec!["a@b"])),
            ],
        )
        .unwrap();
        assert!(matches!(
            table.validate_batch(&batch),
            Err(Error::InvalidArgumentError(_))
        ));
    }

    #[test]
    fn test_unsupported_pk_type_is_rejected() {
        let schema = Arc::new(Schema::new(vec![Field::new("f", DataType::Float64, false)]));
        assert!(TableSchema::new("t", schema, 0).is_err());
    }
}

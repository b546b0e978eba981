//! Primary key values and their conversion to and from Arrow arrays.

use std::fmt;

use arrow::array::{
    Array, ArrayRef, Int32Array, Int64Array, StringArray, UInt32Array, UInt64Array,
};
use arrow::datatypes::DataType;
use llkv_result::{Error, Result as LlkvResult};
use std::sync::Arc;

/// A single primary key value.
///
/// Signed integer columns widen to [`PkValue::Int`], unsigned ones to
/// [`PkValue::UInt`]; widening preserves ordering, so zonemaps built over
/// `PkValue`s prune exactly like zonemaps over the native column.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PkValue {
    Int(i64),
    UInt(u64),
    Str(String),
}

impl PkValue {
    /// Append a type-tagged byte encoding used for bloom filter probes.
    pub fn encode_into(&self, out: &mut Vec<u8>) {
        match self {
            PkValue::Int(v) => {
                out.push(1);
                out.extend_from_slice(&v.to_be_bytes());
            }
            PkValue::UInt(v) => {
                out.push(2);
                out.extend_from_slice(&v.to_be_bytes());
            }
            PkValue::Str(s) => {
                out.push(3);
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    pub fn encoded(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(9);
        self.encode_into(&mut out);
        out
    }
}

impl fmt::Display for PkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PkValue::Int(v) => write!(f, "{v}"),
            PkValue::UInt(v) => write!(f, "{v}"),
            PkValue::Str(s) => f.write_str(s),
        }
    }
}

impl From<i64> for PkValue {
    fn from(v: i64) -> Self {
        PkValue::Int(v)
    }
}

impl From<i32> for PkValue {
    fn from(v: i32) -> Self {
        PkValue::Int(v as i64)
    }
}

impl From<u64> for PkValue {
    fn from(v: u64) -> Self {
        PkValue::UInt(v)
    }
}

impl From<&str> for PkValue {
    fn from(v: &str) -> Self {
        PkValue::Str(v.to_string())
    }
}

/// Whether `data_type` may be used as a primary key column.
pub fn is_supported_pk_type(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int32 | DataType::Int64 | DataType::UInt32 | DataType::UInt64 | DataType::Utf8
    )
}

fn downcast<T: 'static>(array: &dyn Array) -> LlkvResult<&T> {
    array.as_any().downcast_ref::<T>().ok_or_else(|| {
        Error::Internal(format!(
            "primary key array does not match its data type {:?}",
            array.data_type()
        ))
    })
}

/// Extract the primary key values of `array`.
///
/// Fails with [`Error::InvalidArgumentError`] when the column contains NULLs or uses
/// an unsupported type.
pub fn pk_values(array: &dyn Array) -> LlkvResult<Vec<PkValue>> {
    if array.null_count() > 0 {
        return Err(Error::InvalidArgumentError(
            "primary key column must not contain NULL".into(),
        ));
    }
    let values = match array.data_type() {
        DataType::Int32 => downcast::<Int32Array>(array)?
            .values()
            .iter()
            .map(|v| PkValue::Int(*v as i64))
            .collect(),
        DataType::Int64 => downcast::<Int64Array>(array)?
            .values()
            .iter()
            .map(|v| PkValue::Int(*v))
            .collect(),
        DataType::UInt32 => downcast::<UInt32Array>(array)?
            .values()
            .iter()
            .map(|v| PkValue::UInt(*v as u64))
            .collect(),
        DataType::UInt64 => downcast::<UInt64Array>(array)?
            .values()
            .iter()
            .map(|v| PkValue::UInt(*v))
            .collect(),
        DataType::Utf8 => {
            let strings = downcast::<StringArray>(array)?;
            (0..strings.len())
                .map(|i| PkValue::Str(strings.value(i).to_string()))
                .collect()
        }
        other => {
            return Err(Error::InvalidArgumentError(format!(
                "unsupported primary key type {other:?}"
            )));
        }
    };
    Ok(values)
}

fn mismatch(value: &PkValue, data_type: &DataType) -> Error {
    Error::InvalidArgumentError(format!(
        "primary key value {value} does not fit column type {data_type:?}"
    ))
}

/// Build an Arrow array of `data_type` from primary key values.
pub fn pk_array(data_type: &DataType, values: &[PkValue]) -> LlkvResult<ArrayRef> {
    let array: ArrayRef = match data_type {
        DataType::Int32 => {
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    PkValue::Int(x) => {
                        out.push(i32::try_from(*x).map_err(|_| mismatch(v, data_type))?)
                    }
                    _ => return Err(mismatch(v, data_type)),
                }
            }
            Arc::new(Int32Array::from(out))
        }
        DataType::Int64 => {
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    PkValue::Int(x) => out.push(*x),
                    _ => return Err(mismatch(v, data_type)),
                }
            }
            Arc::new(Int64Array::from(out))
        }
        DataType::UInt32 => {
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    PkValue::UInt(x) => {
                        out.push(u32::try_from(*x).map_err(|_| mismatch(v, data_type))?)
                    }
                    _ => return Err(mismatch(v, data_type)),
                }
            }
            Arc::new(UInt32Array::from(out))
        }
        DataType::UInt64 => {
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    PkValue::UInt(x) => out.push(*x),
                    _ => return Err(mismatch(v, data_type)),
                }
            }
            Arc::new(UInt64Array::from(out))
        }
        DataType::Utf8 => {
            let mut out = Vec::with_capacity(values.len());
            for v in values {
                match v {
                    PkValue::Str(s) => out.push(s.as_str()),
                    _ => return Err(mismatch(v, data_type)),
                }
            }
            Arc::new(StringArray::from(out))
        }
        other => {
            return Err(Error::InvalidArgumentError(format!(
                "unsupported primary key type {other:?}"
            )));
        }
    };
    Ok(array)
}

//! Key extraction from Arrow record batches.

use arrow::array::{Array, AsArray};
use arrow::datatypes::{
    DataType, Date32Type, Date64Type, Float32Type, Float64Type, Int16Type, Int32Type, Int64Type,
    Int8Type, TimeUnit, TimestampMicrosecondType, TimestampMillisecondType,
    TimestampNanosecondType, TimestampSecondType, UInt16Type, UInt32Type, UInt64Type, UInt8Type,
};
use arrow::record_batch::RecordBatch;

use crate::error::{KeysetError, Result};
use crate::key::{Key, KeyValue};

/// The ordered list of columns that make up a key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyColumns {
    columns: Vec<String>,
}

impl KeyColumns {
    /// Creates a key definition from column names, in key order.
    pub fn new<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// Column names in key order.
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Binds the key columns to a batch, checking names and types.
    pub fn resolve<'a>(&self, batch: &'a RecordBatch) -> Result<BatchKeys<'a>> {
        if self.columns.is_empty() {
            return Err(KeysetError::configuration("a key needs at least one column"));
        }

        let mut arrays = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            let array = batch
                .column_by_name(column)
                .ok_or_else(|| KeysetError::ColumnNotFound {
                    column: column.clone(),
                })?;
            if !is_supported(array.data_type()) {
                return Err(KeysetError::encoding(format!(
                    "column '{column}' has unsupported key type {}",
                    array.data_type()
                )));
            }
            arrays.push(array.as_ref());
        }

        Ok(BatchKeys {
            arrays,
            num_rows: batch.num_rows(),
        })
    }
}

/// Key columns bound to one record batch.
#[derive(Debug)]
pub struct BatchKeys<'a> {
    arrays: Vec<&'a dyn Array>,
    num_rows: usize,
}

impl BatchKeys<'_> {
    /// Number of rows in the batch.
    pub fn num_rows(&self) -> usize {
        self.num_rows
    }

    /// Builds the key for one row. Arrow nulls become [`KeyValue::Null`].
    pub fn key_at(&self, row: usize) -> Result<Key> {
        let values = self
            .arrays
            .iter()
            .map(|array| value_at(*array, row))
            .collect::<Result<Vec<_>>>()?;
        Ok(Key::from(values))
    }

    /// Iterates the keys of every row in order.
    pub fn iter(&self) -> impl Iterator<Item = Result<Key>> + '_ {
        (0..self.num_rows).map(move |row| self.key_at(row))
    }
}

fn is_supported(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Utf8
            | DataType::LargeUtf8
            | DataType::Boolean
            | DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Float32
            | DataType::Float64
            | DataType::Date32
            | DataType::Date64
            | DataType::Timestamp(_, _)
    )
}

fn value_at(array: &dyn Array, row: usize) -> Result<KeyValue> {
    if array.is_null(row) {
        return Ok(KeyValue::Null);
    }

    let value = match array.data_type() {
        DataType::Utf8 => KeyValue::Str(array.as_string::<i32>().value(row).to_string()),
        DataType::LargeUtf8 => KeyValue::Str(array.as_string::<i64>().value(row).to_string()),
        DataType::Boolean => KeyValue::Bool(array.as_boolean().value(row)),
        DataType::Int8 => KeyValue::Int(array.as_primitive::<Int8Type>().value(row).into()),
        DataType::Int16 => KeyValue::Int(array.as_primitive::<Int16Type>().value(row).into()),
        DataType::Int32 => KeyValue::Int(array.as_primitive::<Int32Type>().value(row).into()),
        DataType::Int64 => KeyValue::Int(array.as_primitive::<Int64Type>().value(row)),
        DataType::UInt8 => KeyValue::UInt(array.as_primitive::<UInt8Type>().value(row).into()),
        DataType::UInt16 => KeyValue::UInt(array.as_primitive::<UInt16Type>().value(row).into()),
        DataType::UInt32 => KeyValue::UInt(array.as_primitive::<UInt32Type>().value(row).into()),
        DataType::UInt64 => KeyValue::UInt(array.as_primitive::<UInt64Type>().value(row)),
        DataType::Float32 => {
            KeyValue::Float(array.as_primitive::<Float32Type>().value(row).into())
        }
        DataType::Float64 => KeyValue::Float(array.as_primitive::<Float64Type>().value(row)),
        DataType::Date32 => KeyValue::Date(out_of_range(
            array.as_primitive::<Date32Type>().value_as_date(row),
            row,
        )?),
        DataType::Date64 => KeyValue::Date(out_of_range(
            array.as_primitive::<Date64Type>().value_as_date(row),
            row,
        )?),
        DataType::Timestamp(unit, _) => {
            let datetime = match unit {
                TimeUnit::Second => array
                    .as_primitive::<TimestampSecondType>()
                    .value_as_datetime(row),
                TimeUnit::Millisecond => array
                    .as_primitive::<TimestampMillisecondType>()
                    .value_as_datetime(row),
                TimeUnit::Microsecond => array
                    .as_primitive::<TimestampMicrosecondType>()
                    .value_as_datetime(row),
                TimeUnit::Nanosecond => array
                    .as_primitive::<TimestampNanosecondType>()
                    .value_as_datetime(row),
            };
            KeyValue::Timestamp(out_of_range(datetime, row)?)
        }
        other => {
            return Err(KeysetError::encoding(format!(
                "unsupported key type {other}"
            )))
        }
    };
    Ok(value)
}

fn out_of_range<T>(value: Option<T>, row: usize) -> Result<T> {
    value.ok_or_else(|| KeysetError::encoding(format!("temporal value out of range at row {row}")))
}

//! Columnar encoding of normalized batches (Arrow in memory, Parquet on disk)

use super::normalize::{NormalizedBatch, AMOUNT_FIELD, EVENT_TIMESTAMP_FIELD};
use arrow::array::{
    ArrayRef, BooleanArray, Float64Array, Int64Array, StringArray, TimestampMicrosecondArray,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use evt_common::{EtlError, Result};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use serde_json::Value;
use std::collections::HashMap;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

/// Timezone recorded on the `event_timestamp` column
pub const UTC_TIMEZONE: &str = "UTC";

/// Field metadata key naming how a Utf8 column's values are encoded
pub const ENCODING_METADATA_KEY: &str = "evt.encoding";

/// Encoding of columns whose every value is a JSON document
pub const JSON_ENCODING: &str = "json";

/// Storage type of a free-form column, inferred over the whole batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Int64,
    Float64,
    Utf8,
    /// Arrays, objects and mixed-type columns, stored as one JSON document per
    /// value and tagged with [`JSON_ENCODING`] so readers can decode them
    Json,
}

impl ColumnType {
    fn data_type(self) -> DataType {
        match self {
            ColumnType::Boolean => DataType::Boolean,
            ColumnType::Int64 => DataType::Int64,
            ColumnType::Float64 => DataType::Float64,
            ColumnType::Utf8 | ColumnType::Json => DataType::Utf8,
        }
    }
}

/// Infer a column's type from its non-null values.
///
/// Integers widen to floats when mixed with them; any other mix falls back to JSON
/// text. A column of only nulls is Utf8.
pub fn infer_column_type<'a>(values: impl IntoIterator<Item = Option<&'a Value>>) -> ColumnType {
    let mut inferred: Option<ColumnType> = None;

    for value in values.into_iter().flatten() {
        let current = match value {
            Value::Null => continue,
            Value::Bool(_) => ColumnType::Boolean,
            Value::Number(n) if n.is_i64() => ColumnType::Int64,
            Value::Number(_) => ColumnType::Float64,
            Value::String(_) => ColumnType::Utf8,
            Value::Array(_) | Value::Object(_) => return ColumnType::Json,
        };

        inferred = Some(match (inferred, current) {
            (None, t) => t,
            (Some(a), b) if a == b => a,
            (Some(ColumnType::Int64), ColumnType::Float64)
            | (Some(ColumnType::Float64), ColumnType::Int64) => ColumnType::Float64,
            _ => return ColumnType::Json,
        });
    }

    inferred.unwrap_or(ColumnType::Utf8)
}

/// Arrow schema of the two typed columns; used by readers to check an artifact
pub fn typed_field(name: &str) -> Option<Field> {
    match name {
        AMOUNT_FIELD => Some(Field::new(AMOUNT_FIELD, DataType::Float64, false)),
        EVENT_TIMESTAMP_FIELD => Some(Field::new(
            EVENT_TIMESTAMP_FIELD,
            DataType::Timestamp(TimeUnit::Microsecond, Some(UTC_TIMEZONE.into())),
            false,
        )),
        _ => None,
    }
}

/// Whether `field` holds one JSON document per value
pub fn is_json_encoded(field: &Field) -> bool {
    field.metadata().get(ENCODING_METADATA_KEY).map(String::as_str) == Some(JSON_ENCODING)
}

/// Build a single Arrow record batch in the batch's column order
pub fn to_record_batch(batch: &NormalizedBatch) -> Result<RecordBatch> {
    let records = batch.records();
    let mut fields = Vec::with_capacity(batch.columns().len());
    let mut arrays: Vec<ArrayRef> = Vec::with_capacity(batch.columns().len());

    for name in batch.columns() {
        if let Some(field) = typed_field(name) {
            let array: ArrayRef = if name == AMOUNT_FIELD {
                Arc::new(Float64Array::from(
                    records.iter().map(|r| r.amount).collect::<Vec<_>>(),
                ))
            } else {
                Arc::new(
                    TimestampMicrosecondArray::from(
                        records
                            .iter()
                            .map(|r| r.event_timestamp.timestamp_micros())
                            .collect::<Vec<_>>(),
                    )
                    .with_timezone(UTC_TIMEZONE),
                )
            };
            fields.push(field);
            arrays.push(array);
            continue;
        }

        let column_type = infer_column_type(records.iter().map(|r| r.get(name)));
        let mut field = Field::new(name, column_type.data_type(), true);
        if column_type == ColumnType::Json {
            field = field.with_metadata(HashMap::from([(
                ENCODING_METADATA_KEY.to_string(),
                JSON_ENCODING.to_string(),
            )]));
        }
        fields.push(field);
        arrays.push(build_column(column_type, records.iter().map(|r| r.get(name))));
    }

    RecordBatch::try_new(Arc::new(Schema::new(fields)), arrays)
        .map_err(|e| EtlError::Artifact(format!("failed to assemble record batch: {}", e)))
}

fn build_column<'a>(
    column_type: ColumnType,
    values: impl Iterator<Item = Option<&'a Value>>,
) -> ArrayRef {
    let values = values.map(|v| v.filter(|v| !v.is_null()));

    match column_type {
        ColumnType::Boolean => Arc::new(
            values
                .map(|v| v.and_then(Value::as_bool))
                .collect::<BooleanArray>(),
        ),
        ColumnType::Int64 => Arc::new(
            values
                .map(|v| v.and_then(Value::as_i64))
                .collect::<Int64Array>(),
        ),
        ColumnType::Float64 => Arc::new(
            values
                .map(|v| v.and_then(Value::as_f64))
                .collect::<Float64Array>(),
        ),
        ColumnType::Utf8 => Arc::new(
            values
                .map(|v| v.and_then(Value::as_str).map(str::to_string))
                .collect::<StringArray>(),
        ),
        ColumnType::Json => Arc::new(
            values
                .map(|v| v.map(Value::to_string))
                .collect::<StringArray>(),
        ),
    }
}

/// Write a record batch as Parquet, replacing `path` only once the file is
/// complete.
pub fn write_parquet(path: &Path, batch: &RecordBatch) -> Result<()> {
    let partial = path.with_extension("parquet.part");
    let file = File::create(&partial)?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))
        .map_err(|e| EtlError::Artifact(format!("failed to open parquet writer: {}", e)))?;
    writer
        .write(batch)
        .map_err(|e| EtlError::Artifact(format!("failed to write parquet: {}", e)))?;
    writer
        .close()
        .map_err(|e| EtlError::Artifact(format!("failed to finish parquet: {}", e)))?;

    std::fs::rename(&partial, path)?;
    Ok(())
}

/// Read every record batch of a Parquet file into memory
pub fn read_parquet(path: &Path) -> Result<Vec<RecordBatch>> {
    let file = File::open(path)?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .and_then(|builder| builder.build())
        .map_err(|e| {
            EtlError::Artifact(format!("failed to open parquet {}: {}", path.display(), e))
        })?;

    reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| EtlError::Artifact(format!("failed to read parquet {}: {}", path.display(), e)))
}

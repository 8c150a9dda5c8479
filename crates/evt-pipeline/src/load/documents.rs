//! Arrow rows to BSON documents

use arrow::array::{
    Array, BooleanArray, Float32Array, Float64Array, Int32Array, Int64Array, LargeStringArray,
    StringArray, TimestampMicrosecondArray, TimestampMillisecondArray,
    TimestampNanosecondArray, TimestampSecondArray,
};
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use crate::transform::columnar::is_json_encoded;
use evt_common::{EtlError, Result};
use mongodb::bson::{Bson, DateTime, Document};
use serde_json::Value;

/// One document per row, keyed by column name in schema order.
///
/// Nulls become `Bson::Null`; timestamps become BSON dates at millisecond
/// precision. JSON-encoded columns are decoded back into native arrays,
/// embedded documents and scalars.
pub fn record_batch_to_documents(batch: &RecordBatch) -> Result<Vec<Document>> {
    let schema = batch.schema();
    let mut documents = Vec::with_capacity(batch.num_rows());

    for row in 0..batch.num_rows() {
        let mut document = Document::new();
        for (index, field) in schema.fields().iter().enumerate() {
            let column = batch.column(index).as_ref();
            let value = if is_json_encoded(field) {
                json_cell_to_bson(column, row)
            } else {
                cell_to_bson(column, row)
            }
            .map_err(|e| EtlError::Artifact(format!("column {}: {}", field.name(), e)))?;
            document.insert(field.name().clone(), value);
        }
        documents.push(document);
    }

    Ok(documents)
}

fn cell_to_bson(array: &dyn Array, row: usize) -> Result<Bson> {
    if array.is_null(row) {
        return Ok(Bson::Null);
    }

    let value = match array.data_type() {
        DataType::Boolean => Bson::Boolean(downcast::<BooleanArray>(array)?.value(row)),
        DataType::Int32 => Bson::Int32(downcast::<Int32Array>(array)?.value(row)),
        DataType::Int64 => Bson::Int64(downcast::<Int64Array>(array)?.value(row)),
        DataType::Float32 => Bson::Double(f64::from(downcast::<Float32Array>(array)?.value(row))),
        DataType::Float64 => Bson::Double(downcast::<Float64Array>(array)?.value(row)),
        DataType::Utf8 => Bson::String(downcast::<StringArray>(array)?.value(row).to_string()),
        DataType::LargeUtf8 => {
            Bson::String(downcast::<LargeStringArray>(array)?.value(row).to_string())
        },
        DataType::Timestamp(unit, _) => {
            let millis = match unit {
                TimeUnit::Second => downcast::<TimestampSecondArray>(array)?
                    .value(row)
                    .saturating_mul(1_000),
                TimeUnit::Millisecond => downcast::<TimestampMillisecondArray>(array)?.value(row),
                TimeUnit::Microsecond => downcast::<TimestampMicrosecondArray>(array)?
                    .value(row)
                    .div_euclid(1_000),
                TimeUnit::Nanosecond => downcast::<TimestampNanosecondArray>(array)?
                    .value(row)
                    .div_euclid(1_000_000),
            };
            Bson::DateTime(DateTime::from_millis(millis))
        },
        other => {
            return Err(EtlError::Artifact(format!("unsupported column type {}", other)));
        },
    };

    Ok(value)
}

fn json_cell_to_bson(array: &dyn Array, row: usize) -> Result<Bson> {
    if array.is_null(row) {
        return Ok(Bson::Null);
    }

    let text = downcast::<StringArray>(array)?.value(row);
    let value: Value = serde_json::from_str(text)
        .map_err(|e| EtlError::Artifact(format!("invalid JSON value {}: {}", text, e)))?;
    Ok(json_to_bson(value))
}

/// Plain JSON to BSON; `$`-prefixed keys are kept as ordinary keys
fn json_to_bson(value: Value) -> Bson {
    match value {
        Value::Null => Bson::Null,
        Value::Bool(b) => Bson::Boolean(b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => Bson::Int64(i),
            None => Bson::Double(n.as_f64().unwrap_or(f64::NAN)),
        },
        Value::String(s) => Bson::String(s),
        Value::Array(items) => Bson::Array(items.into_iter().map(json_to_bson).collect()),
        Value::Object(map) => Bson::Document(
            map.into_iter()
                .map(|(key, value)| (key, json_to_bson(value)))
                .collect(),
        ),
    }
}

fn downcast<T: 'static>(array: &dyn Array) -> Result<&T> {
    array
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| EtlError::Artifact(format!("unexpected array for {}", array.data_type())))
}

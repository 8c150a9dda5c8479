//! Record normalization
//!
//! Three column operations, each applied to the whole batch before the next
//! one starts:
//!
//! 1. expand `metadata` into top-level fields (nested wins on collisions)
//! 2. parse `timestamp` into a UTC `event_timestamp`
//! 3. coerce `amount` to `f64`
//!
//! Any failure rejects the whole batch.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use evt_common::{EtlError, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;

pub const METADATA_FIELD: &str = "metadata";
pub const TIMESTAMP_FIELD: &str = "timestamp";
pub const EVENT_TIMESTAMP_FIELD: &str = "event_timestamp";
pub const AMOUNT_FIELD: &str = "amount";

/// Separator for keys of objects nested inside `metadata`
const NESTED_KEY_SEPARATOR: &str = ".";

/// Offset-less layouts are read as UTC.
const NAIVE_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

// Extended (`+05:30`) and basic (`+0530`) offsets, with or without seconds
const OFFSET_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M%:z",
    "%Y-%m-%dT%H:%M%z",
    "%Y-%m-%d %H:%M%:z",
    "%Y-%m-%d %H:%M%z",
];

/// One record after normalization
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    /// Every column other than `amount` and `event_timestamp`
    pub fields: Map<String, Value>,
    pub amount: f64,
    pub event_timestamp: DateTime<Utc>,
}

impl NormalizedRecord {
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.fields.get(column)
    }
}

/// A normalized batch with its column order
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedBatch {
    columns: Vec<String>,
    records: Vec<NormalizedRecord>,
}

impl NormalizedBatch {
    /// Column names in output order, `amount` and `event_timestamp` included
    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Ordered set of column names
#[derive(Default)]
struct ColumnOrder {
    names: Vec<String>,
    seen: HashSet<String>,
}

impl ColumnOrder {
    fn push(&mut self, name: &str) {
        if self.seen.insert(name.to_string()) {
            self.names.push(name.to_string());
        }
    }

    fn remove(&mut self, name: &str) {
        if self.seen.remove(name) {
            self.names.retain(|n| n != name);
        }
    }
}

/// Parse and normalize a raw batch (a JSON array of objects)
pub fn normalize_batch(raw: &[u8]) -> Result<NormalizedBatch> {
    let records = parse_records(raw)?;
    let (mut rows, mut order) = expand_metadata(records)?;

    let timestamps = rows
        .iter_mut()
        .enumerate()
        .map(|(index, row)| take_timestamp(index, row))
        .collect::<Result<Vec<_>>>()?;
    order.remove(TIMESTAMP_FIELD);
    order.push(EVENT_TIMESTAMP_FIELD);

    let amounts = rows
        .iter_mut()
        .enumerate()
        .map(|(index, row)| take_amount(index, row))
        .collect::<Result<Vec<_>>>()?;

    let records = rows
        .into_iter()
        .zip(timestamps)
        .zip(amounts)
        .map(|((mut fields, event_timestamp), amount)| {
            fields.remove(EVENT_TIMESTAMP_FIELD);
            NormalizedRecord {
                fields,
                amount,
                event_timestamp,
            }
        })
        .collect();

    Ok(NormalizedBatch {
        columns: order.names,
        records,
    })
}

fn parse_records(raw: &[u8]) -> Result<Vec<Map<String, Value>>> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| EtlError::Parse(format!("raw batch is not valid JSON: {}", e)))?;

    let Value::Array(items) = value else {
        return Err(EtlError::Parse(
            "raw batch must be a JSON array of objects".to_string(),
        ));
    };

    items
        .into_iter()
        .enumerate()
        .map(|(index, item)| match item {
            Value::Object(object) => Ok(object),
            other => Err(EtlError::Parse(format!(
                "record {} is a JSON {}, expected an object",
                index,
                json_type_name(&other)
            ))),
        })
        .collect()
}

/// Step 1. All-or-nothing over the batch: every record must carry an
/// object-valued `metadata`.
fn expand_metadata(
    records: Vec<Map<String, Value>>,
) -> Result<(Vec<Map<String, Value>>, ColumnOrder)> {
    if records.is_empty() {
        return Err(EtlError::Schema(
            "batch is empty, no metadata column to expand".to_string(),
        ));
    }

    for (index, record) in records.iter().enumerate() {
        match record.get(METADATA_FIELD) {
            Some(Value::Object(_)) => {},
            Some(other) => {
                return Err(EtlError::Schema(format!(
                    "record {} has {} metadata, expected an object",
                    index,
                    json_type_name(other)
                )))
            },
            None => {
                return Err(EtlError::Schema(format!(
                    "record {} is missing the metadata field",
                    index
                )))
            },
        }
    }

    let mut top_level = ColumnOrder::default();
    let mut nested = ColumnOrder::default();
    let mut rows = Vec::with_capacity(records.len());

    for record in records {
        let mut flat = Map::new();
        let mut metadata = Map::new();

        for (key, value) in record {
            if key == METADATA_FIELD {
                if let Value::Object(object) = value {
                    metadata = object;
                }
            } else {
                top_level.push(&key);
                flat.insert(key, value);
            }
        }

        let mut expanded = Vec::new();
        flatten_into(&mut expanded, None, metadata);
        for (key, value) in expanded {
            nested.push(&key);
            flat.insert(key, value);
        }

        rows.push(flat);
    }

    for name in nested.names {
        top_level.push(&name);
    }

    Ok((rows, top_level))
}

fn flatten_into(out: &mut Vec<(String, Value)>, prefix: Option<&str>, object: Map<String, Value>) {
    for (key, value) in object {
        let name = match prefix {
            Some(prefix) => format!("{}{}{}", prefix, NESTED_KEY_SEPARATOR, key),
            None => key,
        };
        match value {
            Value::Object(inner) => flatten_into(out, Some(&name), inner),
            other => out.push((name, other)),
        }
    }
}

/// Step 2
fn take_timestamp(index: usize, row: &mut Map<String, Value>) -> Result<DateTime<Utc>> {
    match row.remove(TIMESTAMP_FIELD) {
        Some(Value::String(text)) => parse_timestamp(&text).ok_or_else(|| {
            EtlError::Parse(format!("record {} has unparseable timestamp {:?}", index, text))
        }),
        Some(other) => Err(EtlError::Parse(format!(
            "record {} has a {} timestamp, expected a string",
            index,
            json_type_name(&other)
        ))),
        None => Err(EtlError::Schema(format!(
            "record {} is missing the timestamp field",
            index
        ))),
    }
}

/// Parse a timestamp into an absolute UTC instant.
///
/// Values without an offset are taken to be UTC; a bare date is midnight UTC.
pub fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();

    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }

    for format in OFFSET_DATETIME_FORMATS {
        if let Ok(parsed) = DateTime::parse_from_str(text, format) {
            return Some(parsed.with_timezone(&Utc));
        }
    }

    if let Some(stripped) = text.strip_suffix(['Z', 'z']) {
        if let Some(parsed) = parse_naive(stripped) {
            return Some(parsed);
        }
    }

    if let Some(parsed) = parse_naive(text) {
        return Some(parsed);
    }

    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn parse_naive(text: &str) -> Option<DateTime<Utc>> {
    NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .map(|naive| naive.and_utc())
}

/// Step 3
fn take_amount(index: usize, row: &mut Map<String, Value>) -> Result<f64> {
    let value = row.remove(AMOUNT_FIELD).ok_or_else(|| {
        EtlError::Schema(format!("record {} is missing the amount field", index))
    })?;

    coerce_amount(&value).ok_or_else(|| {
        EtlError::Parse(format!(
            "record {} has non-numeric amount {}",
            index, value
        ))
    })
}

/// Coerce a JSON number or numeric string to a finite `f64`
pub fn coerce_amount(value: &Value) -> Option<f64> {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;

    number.is_finite().then_some(number)
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn normalize(value: Value) -> Result<NormalizedBatch> {
        normalize_batch(value.to_string().as_bytes())
    }

    #[test]
    fn test_single_record() {
        let batch = normalize(json!([
            {"timestamp": "2024-01-01T00:00:00Z", "amount": "10.5", "metadata": {"user": "a"}}
        ]))
        .unwrap();

        assert_eq!(batch.columns(), ["amount", "user", "event_timestamp"]);
        let record = &batch.records()[0];
        assert_eq!(record.amount, 10.5);
        assert_eq!(
            record.event_timestamp,
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(record.get("user"), Some(&json!("a")));
        assert!(record.get("metadata").is_none());
        assert!(record.get("timestamp").is_none());
    }

    #[test]
    fn test_column_order_across_records() {
        let batch = normalize(json!([
            {"id": 1, "metadata": {"x": 1}, "timestamp": "2024-01-01", "amount": 1},
            {"id": 2, "kind": "b", "metadata": {"y": 2, "x": 3}, "timestamp": "2024-01-02", "amount": 2}
        ]))
        .unwrap();

        assert_eq!(batch.columns(), ["id", "amount", "kind", "x", "y", "event_timestamp"]);
        assert_eq!(batch.records()[0].get("kind"), None);
        assert_eq!(batch.records()[1].get("x"), Some(&json!(3)));
    }

    #[test]
    fn test_nested_metadata_wins_collisions() {
        let batch = normalize(json!([
            {"user": "top", "timestamp": "2024-01-01T00:00:00Z", "amount": 1,
             "metadata": {"user": "nested"}}
        ]))
        .unwrap();

        assert_eq!(batch.columns(), ["user", "amount", "event_timestamp"]);
        assert_eq!(batch.records()[0].get("user"), Some(&json!("nested")));
    }

    #[test]
    fn test_deep_metadata_is_flattened_with_dots() {
        let batch = normalize(json!([
            {"timestamp": "2024-01-01T00:00:00Z", "amount": 1,
             "metadata": {"device": {"os": "linux", "version": 6}, "tags": ["a", "b"]}}
        ]))
        .unwrap();

        assert_eq!(
            batch.columns(),
            ["amount", "device.os", "device.version", "tags", "event_timestamp"]
        );
        assert_eq!(batch.records()[0].get("tags"), Some(&json!(["a", "b"])));
    }

    #[test]
    fn test_missing_metadata_fails_whole_batch() {
        let err = normalize(json!([
            {"timestamp": "2024-01-01T00:00:00Z", "amount": 1, "metadata": {"user": "a"}},
            {"timestamp": "2024-01-01T00:00:00Z", "amount": 2}
        ]))
        .unwrap_err();

        assert!(matches!(err, EtlError::Schema(ref msg) if msg.contains("record 1")));
    }

    #[test]
    fn test_non_object_metadata_is_schema_error() {
        let err = normalize(json!([
            {"timestamp": "2024-01-01T00:00:00Z", "amount": 1, "metadata": null}
        ]))
        .unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn test_empty_batch_is_schema_error() {
        assert!(matches!(normalize(json!([])).unwrap_err(), EtlError::Schema(_)));
    }

    #[test]
    fn test_malformed_input_is_parse_error() {
        assert!(matches!(normalize_batch(b"not json").unwrap_err(), EtlError::Parse(_)));
        assert!(matches!(normalize(json!({"a": 1})).unwrap_err(), EtlError::Parse(_)));
        assert!(matches!(normalize(json!([1, 2])).unwrap_err(), EtlError::Parse(_)));
    }

    #[test]
    fn test_unparseable_timestamp_fails_whole_batch() {
        let err = normalize(json!([
            {"timestamp": "2024-01-01T00:00:00Z", "amount": 1, "metadata": {}},
            {"timestamp": "yesterday", "amount": 1, "metadata": {}}
        ]))
        .unwrap_err();
        assert!(matches!(err, EtlError::Parse(ref msg) if msg.contains("yesterday")));
    }

    #[test]
    fn test_missing_timestamp_is_schema_error() {
        let err = normalize(json!([{"amount": 1, "metadata": {}}])).unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn test_timestamp_offsets_normalize_to_utc() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).unwrap();

        for text in [
            "2024-03-10T12:30:00Z",
            "2024-03-10T14:30:00+02:00",
            "2024-03-10 07:30:00-05:00",
            "2024-03-10T12:30:00",
            "2024-03-10 12:30:00",
            "2024-03-10 12:30:00Z",
            "2024-03-10T12:30:00+0000",
            "2024-03-10T18:00:00+0530",
            "2024-03-10T12:30:00.000+0000",
            "2024-03-10T12:30Z",
            "2024-03-10T12:30",
            "2024-03-10T14:30+02:00",
            "2024-03-10T04:30-0800",
            "2024-03-10 12:30",
        ] {
            assert_eq!(parse_timestamp(text), Some(expected), "parsing {}", text);
        }

        assert_eq!(
            parse_timestamp("2024-03-10"),
            Some(Utc.with_ymd_and_hms(2024, 3, 10, 0, 0, 0).unwrap())
        );
        assert_eq!(parse_timestamp("2024-13-40T00:00:00Z"), None);
    }

    #[test]
    fn test_fractional_seconds_are_kept() {
        let parsed = parse_timestamp("2024-01-01T00:00:00.250Z").unwrap();
        assert_eq!(parsed.timestamp_subsec_millis(), 250);
    }

    #[test]
    fn test_amount_coercion() {
        assert_eq!(coerce_amount(&json!(3)), Some(3.0));
        assert_eq!(coerce_amount(&json!(2.5)), Some(2.5));
        assert_eq!(coerce_amount(&json!(" 7.25 ")), Some(7.25));
        assert_eq!(coerce_amount(&json!("1e3")), Some(1000.0));
        assert_eq!(coerce_amount(&json!("ten")), None);
        assert_eq!(coerce_amount(&json!("inf")), None);
        assert_eq!(coerce_amount(&json!("NaN")), None);
        assert_eq!(coerce_amount(&json!(null)), None);
        assert_eq!(coerce_amount(&json!(true)), None);
    }

    #[test]
    fn test_non_numeric_amount_fails_whole_batch() {
        let err = normalize(json!([
            {"timestamp": "2024-01-01T00:00:00Z", "amount": "1", "metadata": {}},
            {"timestamp": "2024-01-01T00:00:00Z", "amount": "lots", "metadata": {}}
        ]))
        .unwrap_err();
        assert!(matches!(err, EtlError::Parse(ref msg) if msg.contains("record 1")));
    }

    #[test]
    fn test_missing_amount_is_schema_error() {
        let err = normalize(json!([
            {"timestamp": "2024-01-01T00:00:00Z", "metadata": {}}
        ]))
        .unwrap_err();
        assert!(matches!(err, EtlError::Schema(_)));
    }

    #[test]
    fn test_metadata_timestamp_overrides_top_level() {
        let batch = normalize(json!([
            {"timestamp": "not a date", "amount": 1,
             "metadata": {"timestamp": "2024-05-01T00:00:00Z"}}
        ]))
        .unwrap();

        assert_eq!(
            batch.records()[0].event_timestamp,
            Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
        );
        assert_eq!(batch.columns(), ["amount", "event_timestamp"]);
    }

    #[test]
    fn test_existing_event_timestamp_column_keeps_position() {
        let batch = normalize(json!([
            {"event_timestamp": "stale", "timestamp": "2024-01-01T00:00:00Z", "amount": 1,
             "metadata": {"user": "a"}}
        ]))
        .unwrap();

        assert_eq!(batch.columns(), ["event_timestamp", "amount", "user"]);
        assert!(batch.records()[0].get("event_timestamp").is_none());
    }
}

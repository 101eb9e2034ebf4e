//! Query Result - engine-neutral rows and JSON-safe scalar conversion

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use uuid::Uuid;

/// One result row: column name → JSON-safe value.
pub type Record = Map<String, Value>;

/// Rows and column order returned by a query engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryOutput {
    /// Column names in select-list order
    pub columns: Vec<String>,

    pub rows: Vec<Record>,
}

impl QueryOutput {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }
}

/// A value as decoded from an engine, before JSON conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlScalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(Decimal),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    TimestampTz(DateTime<Utc>),
    Time(NaiveTime),
    Uuid(Uuid),
    Text(String),
    Json(Value),
}

impl SqlScalar {
    /// Decimals become floating point, temporals ISO-8601 strings.
    pub fn into_json(self) -> Value {
        match self {
            SqlScalar::Null => Value::Null,
            SqlScalar::Bool(b) => Value::Bool(b),
            SqlScalar::Int(i) => Value::Number(i.into()),
            SqlScalar::Float(f) => float_value(f),
            SqlScalar::Decimal(d) => d.to_f64().map(float_value).unwrap_or(Value::Null),
            SqlScalar::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            SqlScalar::Timestamp(ts) => Value::String(ts.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            SqlScalar::TimestampTz(ts) => Value::String(ts.to_rfc3339()),
            SqlScalar::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            SqlScalar::Uuid(u) => Value::String(u.to_string()),
            SqlScalar::Text(s) => Value::String(s),
            SqlScalar::Json(v) => v,
        }
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Build a record from column names and decoded scalars.
pub fn record_from(columns: &[String], values: Vec<SqlScalar>) -> Record {
    columns
        .iter()
        .cloned()
        .zip(values.into_iter().map(SqlScalar::into_json))
        .collect()
}

/// True for numbers, strings and nulls.
pub fn is_scalar(value: &Value) -> bool {
    matches!(value, Value::Null | Value::Number(_) | Value::String(_))
}

/// Render a value the way it should appear in a table cell or CSV field.
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_decimal_becomes_float() {
        let d = Decimal::from_str("1234.50").unwrap();
        assert_eq!(SqlScalar::Decimal(d).into_json(), serde_json::json!(1234.5));
    }

    #[test]
    fn test_temporals_become_iso_strings() {
        let date = NaiveDate::from_ymd_opt(2025, 1, 31).unwrap();
        assert_eq!(SqlScalar::Date(date).into_json(), serde_json::json!("2025-01-31"));

        let ts = date.and_hms_opt(13, 5, 0).unwrap();
        assert_eq!(
            SqlScalar::Timestamp(ts).into_json(),
            serde_json::json!("2025-01-31T13:05:00")
        );
        let tz = DateTime::<Utc>::from_naive_utc_and_offset(ts, Utc);
        assert_eq!(
            SqlScalar::TimestampTz(tz).into_json(),
            serde_json::json!("2025-01-31T13:05:00+00:00")
        );
    }

    #[test]
    fn test_non_finite_float_is_null() {
        assert_eq!(SqlScalar::Float(f64::NAN).into_json(), Value::Null);
    }

    #[test]
    fn test_record_from_keeps_column_names() {
        let cols = vec!["app_name".to_string(), "installs".to_string()];
        let rec = record_from(&cols, vec![SqlScalar::Text("Paint".into()), SqlScalar::Int(42)]);
        assert_eq!(rec["app_name"], serde_json::json!("Paint"));
        assert_eq!(rec["installs"], serde_json::json!(42));
    }

    #[test]
    fn test_display_value() {
        assert_eq!(display_value(&Value::Null), "");
        assert_eq!(display_value(&serde_json::json!(3)), "3");
        assert_eq!(display_value(&serde_json::json!(2.0)), "2.0");
        assert_eq!(display_value(&serde_json::json!(2.25)), "2.25");
        assert_eq!(display_value(&serde_json::json!("iOS")), "iOS");
    }
}

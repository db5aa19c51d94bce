use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat};
use qcast_core::Row;
use serde_json::{Number, Value};
use tiberius::{ColumnData, FromSql};

/// Convert a driver row into an ordered column -> JSON map.
pub fn row_to_json(row: tiberius::Row) -> Row {
    let names: Vec<String> = row.columns().iter().map(|c| c.name().to_string()).collect();
    names
        .into_iter()
        .zip(row)
        .map(|(name, data)| (name, column_to_json(data)))
        .collect()
}

fn float(v: f64) -> Value {
    Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null)
}

/// Naive timestamps are read as UTC.
fn naive_timestamp(v: NaiveDateTime) -> Value {
    Value::String(v.and_utc().to_rfc3339_opts(SecondsFormat::Millis, true))
}

pub fn column_to_json(data: ColumnData<'static>) -> Value {
    match data {
        ColumnData::U8(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I16(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I32(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::I64(v) => v.map(Value::from).unwrap_or(Value::Null),
        ColumnData::F32(v) => v.map(|f| float(f64::from(f))).unwrap_or(Value::Null),
        ColumnData::F64(v) => v.map(float).unwrap_or(Value::Null),
        ColumnData::Bit(v) => v.map(Value::Bool).unwrap_or(Value::Null),
        ColumnData::String(v) => v.map(|s| Value::String(s.into_owned())).unwrap_or(Value::Null),
        ColumnData::Guid(v) => v
            .map(|g| Value::String(g.to_string().to_uppercase()))
            .unwrap_or(Value::Null),
        ColumnData::Binary(v) => v.map(|b| Value::String(STANDARD.encode(b))).unwrap_or(Value::Null),
        ColumnData::Numeric(v) => v.map(|n| float(f64::from(n))).unwrap_or(Value::Null),
        ColumnData::Xml(v) => v
            .map(|x| Value::String(x.into_owned().into_string()))
            .unwrap_or(Value::Null),
        ColumnData::Date(_) => match NaiveDate::from_sql(&data) {
            Ok(Some(d)) => naive_timestamp(d.and_time(NaiveTime::MIN)),
            _ => Value::Null,
        },
        ColumnData::Time(_) => match NaiveTime::from_sql(&data) {
            Ok(Some(t)) => Value::String(t.format("%H:%M:%S%.3f").to_string()),
            _ => Value::Null,
        },
        ColumnData::DateTimeOffset(_) => match DateTime::<FixedOffset>::from_sql(&data) {
            Ok(Some(dt)) => Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
            _ => Value::Null,
        },
        ColumnData::DateTime(_) | ColumnData::SmallDateTime(_) | ColumnData::DateTime2(_) => {
            match NaiveDateTime::from_sql(&data) {
                Ok(Some(dt)) => naive_timestamp(dt),
                _ => Value::Null,
            }
        }
    }
}

//! Row to JSON conversion.
//!
//! Every column type either has an explicit JSON mapping or fails the row
//! with a data exception naming the column. Nothing is silently nulled.

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use serde_json::{Map, Number, Value};
use tokio_postgres::Row;
use tokio_postgres::types::{FromSql, Type};
use uuid::Uuid;

use crate::database::error::{CODE_DATA_EXCEPTION, QueryError};

/// Convert a row to a JSON object keyed by column name
pub fn row_to_json(row: &Row) -> Result<Map<String, Value>, QueryError> {
    let mut object = Map::with_capacity(row.len());
    for (idx, column) in row.columns().iter().enumerate() {
        let value = column_value(row, idx, column.type_()).map_err(|e| {
            QueryError::new(format!("Failed to read column \"{}\"", column.name()), CODE_DATA_EXCEPTION)
                .with_details(e.to_string())
        })?;
        let value = value.ok_or_else(|| unmapped_column(column.name(), column.type_()))?;
        object.insert(column.name().to_string(), value);
    }
    Ok(object)
}

/// Deserialize a row into the caller's row type via its JSON form
pub fn decode_row<T: DeserializeOwned>(row: &Row) -> Result<T, QueryError> {
    let object = row_to_json(row)?;
    serde_json::from_value(Value::Object(object)).map_err(|e| {
        QueryError::new("Row does not match the requested shape", CODE_DATA_EXCEPTION)
            .with_details(e.to_string())
    })
}

fn unmapped_column(name: &str, ty: &Type) -> QueryError {
    QueryError::new(
        format!("Column \"{name}\" has type {ty}, which has no JSON mapping"),
        CODE_DATA_EXCEPTION,
    )
    .with_hint(format!("cast \"{name}\" to text in the select list"))
}

fn bytea_hex(bytes: &[u8]) -> String {
    let mut hex = String::with_capacity(2 + bytes.len() * 2);
    hex.push_str("\\x");
    for b in bytes {
        hex.push_str(&format!("{b:02x}"));
    }
    hex
}

fn array<T>(items: Vec<Option<T>>, f: impl Fn(T) -> Value) -> Value {
    Value::Array(items.into_iter().map(|item| item.map_or(Value::Null, &f)).collect())
}

/// The column as JSON. `Ok(None)` means the type has no mapping;
/// SQL `NULL` is `Ok(Some(Value::Null))`.
fn column_value(row: &Row, idx: usize, ty: &Type) -> Result<Option<Value>, tokio_postgres::Error> {
    let value = match *ty {
        Type::BOOL => row.try_get::<_, Option<bool>>(idx)?.map(Value::Bool),
        Type::INT2 => row.try_get::<_, Option<i16>>(idx)?.map(Value::from),
        Type::INT4 => row.try_get::<_, Option<i32>>(idx)?.map(Value::from),
        Type::INT8 => row.try_get::<_, Option<i64>>(idx)?.map(Value::from),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|f| Number::from_f64(f as f64).map_or(Value::Null, Value::Number)),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)?
            .map(|f| Number::from_f64(f).map_or(Value::Null, Value::Number)),
        // Decimal text keeps every digit; f64 would not
        Type::NUMERIC => row
            .try_get::<_, Option<Decimal>>(idx)?
            .map(|d| Value::String(d.to_string())),
        Type::UUID => row
            .try_get::<_, Option<Uuid>>(idx)?
            .map(|u| Value::String(u.to_string())),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)?
            .map(|ts| Value::String(ts.to_rfc3339())),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)?
            .map(|ts| Value::String(ts.to_string())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)?
            .map(|d| Value::String(d.to_string())),
        Type::TIME => row
            .try_get::<_, Option<NaiveTime>>(idx)?
            .map(|t| Value::String(t.to_string())),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(|b| Value::String(bytea_hex(&b))),
        Type::JSON | Type::JSONB => row.try_get::<_, Option<Value>>(idx)?,
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => row
            .try_get::<_, Option<Vec<Option<String>>>>(idx)?
            .map(|items| array(items, Value::String)),
        Type::BOOL_ARRAY => row
            .try_get::<_, Option<Vec<Option<bool>>>>(idx)?
            .map(|items| array(items, Value::Bool)),
        Type::INT4_ARRAY => row
            .try_get::<_, Option<Vec<Option<i32>>>>(idx)?
            .map(|items| array(items, Value::from)),
        Type::INT8_ARRAY => row
            .try_get::<_, Option<Vec<Option<i64>>>>(idx)?
            .map(|items| array(items, Value::from)),
        Type::UUID_ARRAY => row
            .try_get::<_, Option<Vec<Option<Uuid>>>>(idx)?
            .map(|items| array(items, |u| Value::String(u.to_string()))),
        Type::NUMERIC_ARRAY => row
            .try_get::<_, Option<Vec<Option<Decimal>>>>(idx)?
            .map(|items| array(items, |d| Value::String(d.to_string()))),
        // Text-like types, including extension types such as citext
        _ if <String as FromSql>::accepts(ty) => {
            row.try_get::<_, Option<String>>(idx)?.map(Value::String)
        }
        _ => return Ok(None),
    };
    Ok(Some(value.unwrap_or(Value::Null)))
}

//! Dynamically typed bind parameter.
//!
//! Builder callers pass plain Rust values or JSON; the concrete Postgres
//! encoding is chosen when the statement is bound, from the parameter type
//! the server inferred for each `$n` placeholder.

use std::str::FromStr;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde_json::Value;
use thiserror::Error;
use tokio_postgres::types::{IsNull, ToSql, Type, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn std::error::Error + Sync + Send>;

#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Uuid(Uuid),
    Timestamp(DateTime<Utc>),
    /// Arrays and objects, stored as `json`/`jsonb` or expanded into array columns
    Json(Value),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<Value> for SqlValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => SqlValue::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => SqlValue::Text(s),
            other => SqlValue::Json(other),
        }
    }
}

macro_rules! impl_from {
    ($($ty:ty => $variant:ident $(as $cast:ty)?),* $(,)?) => {
        $(
            impl From<$ty> for SqlValue {
                fn from(value: $ty) -> Self {
                    SqlValue::$variant(value $(as $cast)?)
                }
            }
        )*
    };
}

impl_from! {
    bool => Bool,
    i16 => Int as i64,
    i32 => Int as i64,
    i64 => Int,
    u32 => Int as i64,
    f32 => Float as f64,
    f64 => Float,
    String => Text,
    Uuid => Uuid,
    DateTime<Utc> => Timestamp,
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<&String> for SqlValue {
    fn from(value: &String) -> Self {
        SqlValue::Text(value.clone())
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(SqlValue::Null, Into::into)
    }
}

/// A value that cannot be encoded as the parameter type the server inferred
#[derive(Debug, Error)]
#[error("cannot bind {value} to a parameter of type {ty}: {reason}")]
pub struct BindError {
    pub value: &'static str,
    pub ty: String,
    pub reason: String,
}

impl SqlValue {
    fn kind(&self) -> &'static str {
        match self {
            SqlValue::Null => "null",
            SqlValue::Bool(_) => "a boolean",
            SqlValue::Int(_) => "an integer",
            SqlValue::Float(_) => "a float",
            SqlValue::Text(_) => "text",
            SqlValue::Uuid(_) => "a uuid",
            SqlValue::Timestamp(_) => "a timestamp",
            SqlValue::Json(_) => "a JSON array or object",
        }
    }

    fn encode(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        match self {
            SqlValue::Null => Ok(IsNull::Yes),
            SqlValue::Bool(b) => match *ty {
                Type::JSON | Type::JSONB => Value::Bool(*b).to_sql_checked(ty, out),
                Type::TEXT | Type::VARCHAR => b.to_string().to_sql_checked(ty, out),
                _ => b.to_sql_checked(ty, out),
            },
            SqlValue::Int(i) => int_to_sql(*i, ty, out),
            SqlValue::Float(f) => float_to_sql(*f, ty, out),
            SqlValue::Text(s) => text_to_sql(s, ty, out),
            SqlValue::Uuid(u) => match *ty {
                Type::UUID => u.to_sql_checked(ty, out),
                _ => u.to_string().to_sql_checked(ty, out),
            },
            SqlValue::Timestamp(ts) => match *ty {
                Type::TIMESTAMP => ts.naive_utc().to_sql_checked(ty, out),
                Type::DATE => ts.date_naive().to_sql_checked(ty, out),
                Type::TEXT | Type::VARCHAR => ts.to_rfc3339().to_sql_checked(ty, out),
                _ => ts.to_sql_checked(ty, out),
            },
            SqlValue::Json(v) => json_to_sql(v, ty, out),
        }
    }
}

// Every inner encoder goes through `to_sql_checked`, so a value is only ever
// written in a wire format the parameter type actually uses.
impl ToSql for SqlValue {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        self.encode(ty, out).map_err(|e| {
            Box::new(BindError {
                value: self.kind(),
                ty: ty.name().to_string(),
                reason: e.to_string(),
            }) as BoxError
        })
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn int_to_sql(i: i64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::INT2 => i16::try_from(i)?.to_sql_checked(ty, out),
        Type::INT4 => i32::try_from(i)?.to_sql_checked(ty, out),
        Type::FLOAT4 => (i as f32).to_sql_checked(ty, out),
        Type::FLOAT8 => (i as f64).to_sql_checked(ty, out),
        Type::NUMERIC => Decimal::from(i).to_sql_checked(ty, out),
        Type::TEXT | Type::VARCHAR => i.to_string().to_sql_checked(ty, out),
        Type::JSON | Type::JSONB => Value::from(i).to_sql_checked(ty, out),
        _ => i.to_sql_checked(ty, out),
    }
}

/// Largest magnitude at which every integral f64 is exact
const MAX_EXACT_FLOAT: f64 = 9_007_199_254_740_992.0;

fn float_to_sql(f: f64, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::FLOAT4 => (f as f32).to_sql_checked(ty, out),
        Type::NUMERIC => Decimal::from_f64(f)
            .ok_or_else(|| format!("{f} cannot be stored as numeric"))?
            .to_sql_checked(ty, out),
        // `3.0` from JSON is still a whole number
        Type::INT2 | Type::INT4 | Type::INT8 => {
            if f.fract() != 0.0 || !f.is_finite() || f.abs() > MAX_EXACT_FLOAT {
                return Err(format!("{f} is not a whole number").into());
            }
            int_to_sql(f as i64, ty, out)
        }
        Type::TEXT | Type::VARCHAR => f.to_string().to_sql_checked(ty, out),
        Type::JSON | Type::JSONB => Value::from(f).to_sql_checked(ty, out),
        _ => f.to_sql_checked(ty, out),
    }
}

fn text_to_sql(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::UUID => Uuid::parse_str(s)?.to_sql_checked(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s)?
            .with_timezone(&Utc)
            .to_sql_checked(ty, out),
        Type::TIMESTAMP => NaiveDateTime::from_str(s)?.to_sql_checked(ty, out),
        Type::DATE => NaiveDate::from_str(s)?.to_sql_checked(ty, out),
        Type::INT2 => s.parse::<i16>()?.to_sql_checked(ty, out),
        Type::INT4 => s.parse::<i32>()?.to_sql_checked(ty, out),
        Type::INT8 => s.parse::<i64>()?.to_sql_checked(ty, out),
        Type::FLOAT4 => s.parse::<f32>()?.to_sql_checked(ty, out),
        Type::FLOAT8 => s.parse::<f64>()?.to_sql_checked(ty, out),
        Type::NUMERIC => Decimal::from_str(s)?.to_sql_checked(ty, out),
        Type::BOOL => s.parse::<bool>()?.to_sql_checked(ty, out),
        Type::JSON | Type::JSONB => Value::String(s.to_string()).to_sql_checked(ty, out),
        _ => s.to_sql_checked(ty, out),
    }
}

fn json_to_sql(v: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => {
            let items: Vec<Option<String>> = serde_json::from_value(v.clone())?;
            items.to_sql_checked(ty, out)
        }
        Type::INT4_ARRAY => {
            let items: Vec<Option<i32>> = serde_json::from_value(v.clone())?;
            items.to_sql_checked(ty, out)
        }
        Type::INT8_ARRAY => {
            let items: Vec<Option<i64>> = serde_json::from_value(v.clone())?;
            items.to_sql_checked(ty, out)
        }
        Type::BOOL_ARRAY => {
            let items: Vec<Option<bool>> = serde_json::from_value(v.clone())?;
            items.to_sql_checked(ty, out)
        }
        Type::UUID_ARRAY => {
            let items: Vec<Option<Uuid>> = serde_json::from_value(v.clone())?;
            items.to_sql_checked(ty, out)
        }
        Type::TEXT | Type::VARCHAR => v.to_string().to_sql_checked(ty, out),
        _ => v.to_sql_checked(ty, out),
    }
}

//! Database error types.
//!
//! `DatabaseError` is what the pool layer returns. `QueryError` is the
//! structured `{message, details, hint, code}` shape the query builder hands
//! back to callers instead of propagating driver errors.

use deadpool_postgres::PoolError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::database::value::BindError;

/// SQLSTATE `connection_exception`
pub const CODE_CONNECTION: &str = "08000";
/// SQLSTATE `invalid_name`, used for rejected identifiers
pub const CODE_INVALID_NAME: &str = "42602";
/// SQLSTATE `invalid_parameter_value`, used for malformed builder input
pub const CODE_INVALID_PARAMETER: &str = "22023";
/// SQLSTATE `unique_violation`
pub const CODE_UNIQUE_VIOLATION: &str = "23505";
/// SQLSTATE `data_exception`, used when a row does not fit the requested shape
pub const CODE_DATA_EXCEPTION: &str = "22000";
/// SQLSTATE `datatype_mismatch`, used when a bound value does not fit its column
pub const CODE_DATATYPE_MISMATCH: &str = "42804";

pub type DbResult<T> = Result<T, DatabaseError>;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database pool has not been initialized")]
    NotInitialized,

    #[error("Database pool is already initialized")]
    AlreadyInitialized,

    #[error("Timed out waiting for a database connection")]
    Timeout,

    #[error("Database pool is closed")]
    Closed,

    #[error("Failed to create database pool: {0}")]
    Build(String),

    #[error("Database connection error: {0}")]
    Connection(String),

    #[error(transparent)]
    Postgres(#[from] tokio_postgres::Error),
}

impl From<PoolError> for DatabaseError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(_) => DatabaseError::Timeout,
            PoolError::Closed => DatabaseError::Closed,
            PoolError::Backend(e) => DatabaseError::Postgres(e),
            other => DatabaseError::Connection(other.to_string()),
        }
    }
}

impl DatabaseError {
    /// SQLSTATE code reported by the server, if this error came from one
    pub fn code(&self) -> Option<&str> {
        match self {
            DatabaseError::Postgres(e) => e.as_db_error().map(|db| db.code().code()),
            _ => None,
        }
    }
}

/// Structured error returned by the query builder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{message}")]
pub struct QueryError {
    pub message: String,
    pub details: Option<String>,
    pub hint: Option<String>,
    pub code: Option<String>,
}

impl QueryError {
    pub fn new(message: impl Into<String>, code: &str) -> Self {
        Self {
            message: message.into(),
            details: None,
            hint: None,
            code: Some(code.to_string()),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(CODE_UNIQUE_VIOLATION)
    }
}

impl From<DatabaseError> for QueryError {
    fn from(err: DatabaseError) -> Self {
        if let DatabaseError::Postgres(pg) = &err {
            if let Some(db) = pg.as_db_error() {
                return Self {
                    message: db.message().to_string(),
                    details: db.detail().map(str::to_string),
                    hint: db.hint().map(str::to_string),
                    code: Some(db.code().code().to_string()),
                };
            }
            let bind = std::error::Error::source(pg).and_then(|e| e.downcast_ref::<BindError>());
            if let Some(bind) = bind {
                return Self::new(pg.to_string(), CODE_DATATYPE_MISMATCH)
                    .with_details(bind.to_string());
            }
        }

        let hint = match err {
            DatabaseError::Timeout => {
                Some("all pooled connections are busy; retry later".to_string())
            }
            DatabaseError::NotInitialized => {
                Some("call init_pool during startup".to_string())
            }
            _ => None,
        };
        Self {
            message: err.to_string(),
            details: None,
            hint,
            code: Some(CODE_CONNECTION.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_errors_become_connection_errors() {
        let err = QueryError::from(DatabaseError::Timeout);
        assert_eq!(err.code.as_deref(), Some(CODE_CONNECTION));
        assert!(err.message.contains("Timed out"));
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_query_error_serializes_all_fields() {
        let err = QueryError::new("bad column", CODE_INVALID_NAME).with_details("column \"x;\"");
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["message"], "bad column");
        assert_eq!(json["details"], "column \"x;\"");
        assert!(json["hint"].is_null());
        assert_eq!(json["code"], CODE_INVALID_NAME);
    }
}

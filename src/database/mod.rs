//! # Database Module
//!
//! PostgreSQL access through tokio-postgres and a deadpool connection pool:
//! pool lifecycle, the fluent query builder, row decoding and migrations.

pub mod connection;
pub mod error;
pub mod migrations;
pub mod query;
pub mod row;
pub mod value;

pub use connection::{Database, Executor, Tx, close_pool, get_pool, init_pool};
pub use error::{DatabaseError, DbResult, QueryError};
pub use query::{IsValue, QueryBuilder, QueryResponse, Single, Statement};
pub use value::SqlValue;

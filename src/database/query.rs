//! Fluent query builder.
//!
//! A chain accumulates one statement's state and compiles it into SQL text
//! plus a separate parameter list. Caller values only ever travel as `$n`
//! parameters; table and column names are validated and quoted.
//!
//! ```ignore
//! let news = db
//!     .from("news")
//!     .select("id, title_en, title_ar")
//!     .eq("published", true)
//!     .order("created_at", false)
//!     .limit(10)
//!     .exec::<NewsItem>()
//!     .await;
//! ```

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_postgres::Row;

use crate::database::connection::Executor;
use crate::database::error::{CODE_INVALID_NAME, CODE_INVALID_PARAMETER, QueryError};
use crate::database::row::decode_row;
use crate::database::value::SqlValue;

/// `{data, error}` returned by every terminal call. Exactly one of the two is
/// set, except for a `single()` read that matched nothing, where both are
/// `None`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResponse<T> {
    pub data: Option<T>,
    pub error: Option<QueryError>,
}

impl<T> QueryResponse<T> {
    pub fn success(data: Option<T>) -> Self {
        Self { data, error: None }
    }

    pub fn failure(error: QueryError) -> Self {
        Self {
            data: None,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Option<T>, QueryError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.data),
        }
    }
}

impl<T> QueryResponse<Vec<T>> {
    pub fn into_rows(self) -> Result<Vec<T>, QueryError> {
        self.into_result().map(Option::unwrap_or_default)
    }
}

/// Right-hand side of an `IS` test
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsValue {
    Null,
    True,
    False,
}

impl IsValue {
    fn keyword(self) -> &'static str {
        match self {
            IsValue::Null => "NULL",
            IsValue::True => "TRUE",
            IsValue::False => "FALSE",
        }
    }
}

impl From<Option<bool>> for IsValue {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => IsValue::Null,
            Some(true) => IsValue::True,
            Some(false) => IsValue::False,
        }
    }
}

impl From<bool> for IsValue {
    fn from(value: bool) -> Self {
        Some(value).into()
    }
}

#[derive(Debug, Clone)]
enum Filter {
    Compare {
        column: String,
        op: &'static str,
        value: SqlValue,
    },
    In {
        column: String,
        values: Vec<SqlValue>,
    },
    Is {
        column: String,
        value: IsValue,
    },
}

#[derive(Debug, Clone)]
enum Operation {
    Select,
    Insert {
        columns: Vec<String>,
        rows: Vec<Vec<SqlValue>>,
    },
    Update {
        assignments: Vec<(String, SqlValue)>,
    },
    Delete,
}

/// Compiled SQL text and its bound values, in placeholder order
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
    pub returns_rows: bool,
}

/// Positional parameter list. Pushing a value yields its placeholder, so
/// placeholders and values cannot drift apart.
#[derive(Default)]
struct Params(Vec<SqlValue>);

impl Params {
    fn push(&mut self, value: SqlValue) -> String {
        self.0.push(value);
        format!("${}", self.0.len())
    }
}

pub struct QueryBuilder<'e> {
    exec: &'e dyn Executor,
    table: String,
    columns: String,
    operation: Operation,
    filters: Vec<Filter>,
    order: Vec<(String, bool)>,
    limit: Option<u64>,
    single: bool,
    returning: bool,
    invalid: Option<QueryError>,
}

impl<'e> QueryBuilder<'e> {
    pub fn new(exec: &'e dyn Executor, table: &str) -> Self {
        Self {
            exec,
            table: table.to_string(),
            columns: "*".to_string(),
            operation: Operation::Select,
            filters: Vec::new(),
            order: Vec::new(),
            limit: None,
            single: false,
            returning: true,
            invalid: None,
        }
    }

    /// Columns to read, or to return from a write. Comma separated; `*` for all.
    pub fn select(mut self, columns: &str) -> Self {
        self.columns = columns.to_string();
        self
    }

    pub fn eq(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "=", value.into())
    }

    pub fn neq(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "<>", value.into())
    }

    pub fn gt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, ">", value.into())
    }

    pub fn gte(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, ">=", value.into())
    }

    pub fn lt(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "<", value.into())
    }

    pub fn lte(self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.compare(column, "<=", value.into())
    }

    pub fn like(self, column: &str, pattern: &str) -> Self {
        self.compare(column, "LIKE", pattern.into())
    }

    pub fn ilike(self, column: &str, pattern: &str) -> Self {
        self.compare(column, "ILIKE", pattern.into())
    }

    pub fn in_<V, I>(mut self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        self.filters.push(Filter::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// `column IS NULL | TRUE | FALSE`
    pub fn is(mut self, column: &str, value: impl Into<IsValue>) -> Self {
        self.filters.push(Filter::Is {
            column: column.to_string(),
            value: value.into(),
        });
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        self.order.push((column.to_string(), ascending));
        self
    }

    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Expect one row: reads are limited to 1 and the result is an
    /// `Option<T>` instead of a list.
    pub fn single(mut self) -> Single<'e> {
        self.single = true;
        Single(self)
    }

    /// Insert one record (a JSON object) or many (an array of objects) in a
    /// single statement. All records must share the first record's keys.
    pub fn insert<R: Serialize + ?Sized>(mut self, records: &R) -> Self {
        match insert_rows(records) {
            Ok((columns, rows)) => self.operation = Operation::Insert { columns, rows },
            Err(e) => self.invalid = Some(e),
        }
        self
    }

    /// Set the given columns on every row matched by the filters
    pub fn update<R: Serialize + ?Sized>(mut self, patch: &R) -> Self {
        match to_object(patch) {
            Ok(object) if !object.is_empty() => {
                let mut assignments: Vec<(String, SqlValue)> =
                    object.into_iter().map(|(k, v)| (k, v.into())).collect();
                assignments.sort_by(|a, b| a.0.cmp(&b.0));
                self.operation = Operation::Update { assignments };
            }
            Ok(_) => {
                self.invalid = Some(QueryError::new(
                    "update requires at least one column",
                    CODE_INVALID_PARAMETER,
                ));
            }
            Err(e) => self.invalid = Some(e),
        }
        self
    }

    pub fn delete(mut self) -> Self {
        self.operation = Operation::Delete;
        self
    }

    /// Whether writes should return the affected rows. On by default.
    pub fn returning(mut self, returning: bool) -> Self {
        self.returning = returning;
        self
    }

    fn compare(mut self, column: &str, op: &'static str, value: SqlValue) -> Self {
        self.filters.push(Filter::Compare {
            column: column.to_string(),
            op,
            value,
        });
        self
    }

    /// Build the SQL text and parameter list without running it
    pub fn compile(&self) -> Result<Statement, QueryError> {
        if let Some(err) = &self.invalid {
            return Err(err.clone());
        }

        let table = quote_ident(&self.table)?;
        let columns = quote_columns(&self.columns)?;
        let mut params = Params::default();

        let (sql, returns_rows) = match &self.operation {
            Operation::Select => {
                let mut sql = format!("SELECT {columns} FROM {table}");
                sql.push_str(&self.where_clause(&mut params)?);

                if !self.order.is_empty() {
                    let terms = self
                        .order
                        .iter()
                        .map(|(column, asc)| {
                            Ok(format!("{} {}", quote_ident(column)?, if *asc { "ASC" } else { "DESC" }))
                        })
                        .collect::<Result<Vec<_>, QueryError>>()?;
                    sql.push_str(" ORDER BY ");
                    sql.push_str(&terms.join(", "));
                }

                let limit = if self.single { Some(1) } else { self.limit };
                if let Some(n) = limit {
                    sql.push_str(&format!(" LIMIT {n}"));
                }
                (sql, true)
            }
            Operation::Insert { columns: keys, rows } => {
                if !self.filters.is_empty() {
                    return Err(QueryError::new(
                        "insert does not accept filters",
                        CODE_INVALID_PARAMETER,
                    ));
                }
                let keys = keys
                    .iter()
                    .map(|k| quote_ident(k))
                    .collect::<Result<Vec<_>, _>>()?;
                let tuples = rows
                    .iter()
                    .map(|row| {
                        let placeholders: Vec<String> =
                            row.iter().map(|v| params.push(v.clone())).collect();
                        format!("({})", placeholders.join(", "))
                    })
                    .collect::<Vec<_>>();
                let mut sql = format!(
                    "INSERT INTO {table} ({}) VALUES {}",
                    keys.join(", "),
                    tuples.join(", ")
                );
                self.push_returning(&mut sql, &columns);
                (sql, self.returning)
            }
            Operation::Update { assignments } => {
                self.require_filters("update")?;
                let sets = assignments
                    .iter()
                    .map(|(column, value)| {
                        Ok(format!("{} = {}", quote_ident(column)?, params.push(value.clone())))
                    })
                    .collect::<Result<Vec<_>, QueryError>>()?;
                let mut sql = format!("UPDATE {table} SET {}", sets.join(", "));
                sql.push_str(&self.where_clause(&mut params)?);
                self.push_returning(&mut sql, &columns);
                (sql, self.returning)
            }
            Operation::Delete => {
                self.require_filters("delete")?;
                let mut sql = format!("DELETE FROM {table}");
                sql.push_str(&self.where_clause(&mut params)?);
                self.push_returning(&mut sql, &columns);
                (sql, self.returning)
            }
        };

        Ok(Statement {
            sql,
            params: params.0,
            returns_rows,
        })
    }

    fn where_clause(&self, params: &mut Params) -> Result<String, QueryError> {
        if self.filters.is_empty() {
            return Ok(String::new());
        }

        let mut conditions = Vec::with_capacity(self.filters.len());
        for filter in &self.filters {
            let condition = match filter {
                Filter::Compare { column, op, value } => {
                    format!("{} {} {}", quote_ident(column)?, op, params.push(value.clone()))
                }
                Filter::In { column, values } if values.is_empty() => {
                    // `IN ()` is a syntax error; an empty set matches nothing
                    let _ = quote_ident(column)?;
                    "FALSE".to_string()
                }
                Filter::In { column, values } => {
                    let placeholders: Vec<String> =
                        values.iter().map(|v| params.push(v.clone())).collect();
                    format!("{} IN ({})", quote_ident(column)?, placeholders.join(", "))
                }
                Filter::Is { column, value } => {
                    format!("{} IS {}", quote_ident(column)?, value.keyword())
                }
            };
            conditions.push(condition);
        }
        Ok(format!(" WHERE {}", conditions.join(" AND ")))
    }

    fn push_returning(&self, sql: &mut String, columns: &str) {
        if self.returning {
            sql.push_str(" RETURNING ");
            sql.push_str(columns);
        }
    }

    fn require_filters(&self, what: &str) -> Result<(), QueryError> {
        if self.filters.is_empty() {
            return Err(QueryError::new(
                format!("{what} requires at least one filter"),
                CODE_INVALID_PARAMETER,
            )
            .with_hint("add .eq(\"id\", ...) to target specific rows"));
        }
        Ok(())
    }

    async fn run(&self) -> Result<Vec<Row>, QueryError> {
        let statement = self.compile()?;
        tracing::debug!(
            table = %self.table,
            params = statement.params.len(),
            "Executing {}",
            statement.sql
        );

        let result = if statement.returns_rows {
            self.exec.fetch(&statement.sql, &statement.params).await
        } else {
            self.exec
                .execute(&statement.sql, &statement.params)
                .await
                .map(|_| Vec::new())
        };

        result.map_err(|e| {
            let err = QueryError::from(e);
            tracing::warn!(
                table = %self.table,
                code = err.code.as_deref().unwrap_or(""),
                "Query failed: {}",
                err.message
            );
            err
        })
    }

    /// Run the statement and decode every returned row
    pub async fn exec<T: DeserializeOwned>(self) -> QueryResponse<Vec<T>> {
        let rows = match self.run().await {
            Ok(rows) => rows,
            Err(e) => return QueryResponse::failure(e),
        };
        match rows.iter().map(decode_row::<T>).collect::<Result<Vec<T>, _>>() {
            Ok(items) => QueryResponse::success(Some(items)),
            Err(e) => QueryResponse::failure(e),
        }
    }
}

/// A chain that expects at most one row
pub struct Single<'e>(QueryBuilder<'e>);

impl Single<'_> {
    pub fn compile(&self) -> Result<Statement, QueryError> {
        self.0.compile()
    }

    /// Run the statement; zero matching rows gives `data: None` without an error
    pub async fn exec<T: DeserializeOwned>(self) -> QueryResponse<T> {
        let rows = match self.0.run().await {
            Ok(rows) => rows,
            Err(e) => return QueryResponse::failure(e),
        };
        match rows.first().map(decode_row::<T>).transpose() {
            Ok(item) => QueryResponse::success(item),
            Err(e) => QueryResponse::failure(e),
        }
    }
}

fn to_object<R: Serialize + ?Sized>(value: &R) -> Result<serde_json::Map<String, Value>, QueryError> {
    match serde_json::to_value(value) {
        Ok(Value::Object(object)) => Ok(object),
        Ok(_) => Err(QueryError::new(
            "expected an object of column values",
            CODE_INVALID_PARAMETER,
        )),
        Err(e) => Err(QueryError::new("could not serialize record", CODE_INVALID_PARAMETER)
            .with_details(e.to_string())),
    }
}

fn insert_rows<R: Serialize + ?Sized>(
    records: &R,
) -> Result<(Vec<String>, Vec<Vec<SqlValue>>), QueryError> {
    let records = match serde_json::to_value(records) {
        Ok(Value::Array(items)) => items,
        Ok(single @ Value::Object(_)) => vec![single],
        Ok(_) => {
            return Err(QueryError::new(
                "insert expects an object or an array of objects",
                CODE_INVALID_PARAMETER,
            ));
        }
        Err(e) => {
            return Err(QueryError::new("could not serialize record", CODE_INVALID_PARAMETER)
                .with_details(e.to_string()));
        }
    };

    let mut objects = Vec::with_capacity(records.len());
    for record in &records {
        objects.push(to_object(record)?);
    }

    let Some(first) = objects.first() else {
        return Err(QueryError::new(
            "insert requires at least one record",
            CODE_INVALID_PARAMETER,
        ));
    };
    let mut columns: Vec<String> = first.keys().cloned().collect();
    columns.sort();
    if columns.is_empty() {
        return Err(QueryError::new(
            "insert requires at least one column",
            CODE_INVALID_PARAMETER,
        ));
    }

    let mut rows = Vec::with_capacity(objects.len());
    for (idx, mut object) in objects.into_iter().enumerate() {
        if object.len() != columns.len() || !columns.iter().all(|c| object.contains_key(c)) {
            return Err(QueryError::new(
                "all inserted records must have the same columns",
                CODE_INVALID_PARAMETER,
            )
            .with_details(format!("record {idx} differs from record 0")));
        }
        rows.push(
            columns
                .iter()
                .map(|c| object.remove(c).unwrap_or(Value::Null).into())
                .collect(),
        );
    }
    Ok((columns, rows))
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Validate and double-quote a possibly schema-qualified identifier
pub fn quote_ident(name: &str) -> Result<String, QueryError> {
    let name = name.trim();
    let segments: Vec<&str> = name.split('.').collect();
    if name.is_empty() || !segments.iter().all(|s| is_identifier(s)) {
        return Err(QueryError::new("invalid identifier", CODE_INVALID_NAME)
            .with_details(format!("{name:?} is not a plain SQL identifier")));
    }
    Ok(segments
        .iter()
        .map(|s| format!("\"{s}\""))
        .collect::<Vec<_>>()
        .join("."))
}

fn quote_columns(columns: &str) -> Result<String, QueryError> {
    let columns = columns.trim();
    if columns.is_empty() || columns == "*" {
        return Ok("*".to_string());
    }
    Ok(columns
        .split(',')
        .map(quote_ident)
        .collect::<Result<Vec<_>, _>>()?
        .join(", "))
}

// Database Connection Management
//
// Handles PostgreSQL connection pooling using tokio-postgres and deadpool.
// The pool is process-wide: `init_pool` once at startup, `get_pool` from
// request handlers, `close_pool` at shutdown.
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use futures::future::BoxFuture;
use native_tls::TlsConnector;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use postgres_native_tls::MakeTlsConnector;
use tokio::task::JoinHandle;
use tokio_postgres::types::ToSql;
use tokio_postgres::{NoTls, Row};

use crate::config::DatabaseConfig;
use crate::database::error::{DatabaseError, DbResult};
use crate::database::query::QueryBuilder;
use crate::database::value::SqlValue;

static POOL: Lazy<RwLock<Option<Database>>> = Lazy::new(|| RwLock::new(None));

/// Build the process-wide pool. Fails if a pool is already live.
pub async fn init_pool(config: &DatabaseConfig) -> DbResult<Database> {
    if POOL.read().is_some() {
        return Err(DatabaseError::AlreadyInitialized);
    }

    let db = Database::connect(config).await?;

    let mut slot = POOL.write();
    if slot.is_some() {
        // Lost a race with another initializer
        db.close();
        return Err(DatabaseError::AlreadyInitialized);
    }
    *slot = Some(db.clone());
    Ok(db)
}

/// The live process-wide pool
pub fn get_pool() -> DbResult<Database> {
    POOL.read().clone().ok_or(DatabaseError::NotInitialized)
}

/// Close every pooled connection and forget the process-wide pool
pub fn close_pool() {
    if let Some(db) = POOL.write().take() {
        db.close();
        tracing::info!("🔌 Database pool closed");
    }
}

/// Something statements can run against: the pool itself or an open transaction
#[async_trait]
pub trait Executor: Send + Sync {
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>>;

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64>;
}

fn bind(params: &[SqlValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

/// Database connection pool wrapper
#[derive(Debug, Clone)]
pub struct Database {
    pool: Pool,
    reaper: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl Database {
    /// Create a pool with the provided configuration and check that the
    /// server answers
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        let masked_host = format!("{}:{}/{}", config.host, config.port, config.dbname);
        tracing::info!("🔌 Connecting to database: {}", masked_host);

        let mut pg_config = tokio_postgres::Config::new();
        pg_config.host(&config.host);
        pg_config.port(config.port);
        pg_config.user(&config.user);
        pg_config.password(&config.password);
        pg_config.dbname(&config.dbname);
        pg_config.connect_timeout(config.connect_timeout);

        let mgr_config = ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        };
        let mgr = if config.ssl {
            let tls_connector = TlsConnector::builder()
                .build()
                .map_err(|e| DatabaseError::Build(format!("TLS connector: {e}")))?;
            Manager::from_config(pg_config, MakeTlsConnector::new(tls_connector), mgr_config)
        } else {
            Manager::from_config(pg_config, NoTls, mgr_config)
        };

        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .wait_timeout(Some(config.connect_timeout))
            .create_timeout(Some(config.connect_timeout))
            .recycle_timeout(Some(config.connect_timeout))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| DatabaseError::Build(e.to_string()))?;

        let db = Self {
            reaper: Arc::new(Mutex::new(Some(spawn_reaper(pool.clone(), config.idle_timeout)))),
            pool,
        };

        if let Err(e) = db.health_check().await {
            db.close();
            return Err(e);
        }

        tracing::info!(
            max_connections = config.max_connections,
            "✅ Database connection established successfully"
        );
        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Borrow one connection. It goes back to the pool when dropped.
    pub async fn acquire(&self) -> DbResult<deadpool_postgres::Client> {
        Ok(self.pool.get().await?)
    }

    /// Run a statement and return its rows
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.fetch(sql, params).await
    }

    /// Start a query builder chain against `table`
    pub fn from(&self, table: &str) -> QueryBuilder<'_> {
        QueryBuilder::new(self, table)
    }

    /// Run `f` inside `BEGIN`/`COMMIT` on a single connection.
    ///
    /// Any error returned by `f` rolls the transaction back. The connection
    /// is returned to the pool on every path.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: for<'c> FnOnce(&'c Tx<'_>) -> BoxFuture<'c, Result<T, E>> + Send,
        E: From<DatabaseError> + Send,
        T: Send,
    {
        let mut client = self.pool.get().await.map_err(DatabaseError::from)?;
        let inner = client.transaction().await.map_err(DatabaseError::from)?;
        let tx = Tx { inner };

        match f(&tx).await {
            Ok(value) => {
                tx.inner.commit().await.map_err(DatabaseError::from)?;
                Ok(value)
            }
            Err(err) => {
                if let Err(e) = tx.inner.rollback().await {
                    tracing::warn!("Failed to roll back transaction: {}", e);
                } else {
                    tracing::debug!("Transaction rolled back");
                }
                Err(err)
            }
        }
    }

    /// Check database health
    pub async fn health_check(&self) -> DbResult<()> {
        let client = self.acquire().await?;
        client.query("SELECT 1", &[]).await?;
        Ok(())
    }

    /// Get database connection statistics
    pub fn stats(&self) -> ConnectionStats {
        let status = self.pool.status();
        ConnectionStats {
            max_size: status.max_size,
            size: status.size,
            idle: status.available,
            waiting: status.waiting,
        }
    }

    /// Close the pool. Pending and future acquirers fail with `Closed`.
    pub fn close(&self) {
        if let Some(handle) = self.reaper.lock().take() {
            handle.abort();
        }
        self.pool.close();
    }
}

#[async_trait]
impl Executor for Database {
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        let client = self.acquire().await?;
        Ok(client.query(sql, &bind(params)).await?)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        let client = self.acquire().await?;
        Ok(client.execute(sql, &bind(params)).await?)
    }
}

/// An open transaction, handed to `Database::transaction` callbacks
pub struct Tx<'a> {
    inner: deadpool_postgres::Transaction<'a>,
}

impl Tx<'_> {
    pub fn from(&self, table: &str) -> QueryBuilder<'_> {
        QueryBuilder::new(self, table)
    }

    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        self.fetch(sql, params).await
    }
}

#[async_trait]
impl Executor for Tx<'_> {
    async fn fetch(&self, sql: &str, params: &[SqlValue]) -> DbResult<Vec<Row>> {
        Ok(self.inner.query(sql, &bind(params)).await?)
    }

    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DbResult<u64> {
        Ok(self.inner.execute(sql, &bind(params)).await?)
    }
}

/// Periodically close connections that sat idle past `idle_timeout` or died
/// while idle. A dead connection only costs itself.
fn spawn_reaper(pool: Pool, idle_timeout: Duration) -> JoinHandle<()> {
    let period = (idle_timeout / 2).max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        loop {
            interval.tick().await;
            if pool.is_closed() {
                break;
            }

            let before = pool.status().size;
            pool.retain(|client, metrics| {
                if client.is_closed() {
                    tracing::warn!("Dropping pooled connection that failed while idle");
                    return false;
                }
                metrics.last_used() < idle_timeout
            });
            let reaped = before.saturating_sub(pool.status().size);
            if reaped > 0 {
                tracing::debug!(reaped, "Closed idle database connections");
            }
        }
    })
}

/// Database connection statistics
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ConnectionStats {
    pub max_size: usize,
    pub size: usize,
    pub idle: usize,
    pub waiting: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_pool_before_init_fails() {
        // No test in this crate initializes the global pool
        assert!(matches!(get_pool(), Err(DatabaseError::NotInitialized)));
    }
}

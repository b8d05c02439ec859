//! Physical connections.
//!
//! One sqlx pool per node, wrapped in an engine enum so the logical layer stays
//! engine-agnostic without going through `AnyPool`.

use crate::config::PoolOptions;
use crate::db::params::bind_params;
use crate::db::types::RowToRecord;
use crate::dispatch;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, ExecResult, Param, Record};
use futures_util::future::BoxFuture;
use sqlx::pool::PoolOptions as SqlxPoolOptions;
use sqlx::{
    Connection, Executor, MySql, MySqlPool, PgPool, Postgres, Sqlite, SqlitePool, Transaction,
    mysql::MySqlConnectOptions, postgres::PgConnectOptions, sqlite::SqliteConnectOptions,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;

/// Database-specific connection pool (avoids AnyPool limitations).
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

fn sqlx_pool_options<DB: sqlx::Database>(
    opts: &PoolOptions,
    is_sqlite: bool,
) -> SqlxPoolOptions<DB> {
    SqlxPoolOptions::<DB>::new()
        .min_connections(opts.min_connections_or_default())
        .max_connections(opts.max_connections_or_default(is_sqlite))
        .acquire_timeout(Duration::from_secs(opts.acquire_timeout_or_default()))
        .idle_timeout(Some(Duration::from_secs(opts.idle_timeout_or_default())))
        .max_lifetime(Some(Duration::from_secs(opts.max_lifetime_or_default())))
        .test_before_acquire(opts.test_before_acquire_or_default())
}

fn invalid_connection_string(kind: DatabaseType, err: sqlx::Error) -> DbError {
    DbError::connection(
        format!("Invalid {} connection string: {}", kind, err),
        connection_suggestion(kind, &err),
    )
}

/// Generate a helpful suggestion for connection errors.
fn connection_suggestion(kind: DatabaseType, error: &sqlx::Error) -> String {
    let error_str = error.to_string().to_lowercase();

    if error_str.contains("connection refused") {
        return format!("Check that the {} server is running and accessible", kind);
    }

    if error_str.contains("authentication") || error_str.contains("password") {
        return "Verify the username and password of the data source".to_string();
    }

    if error_str.contains("does not exist") || error_str.contains("unknown database") {
        return "Check that the database name exists".to_string();
    }

    if error_str.contains("tls") || error_str.contains("ssl") {
        return "Check TLS/SSL configuration or try disabling it".to_string();
    }

    match kind {
        DatabaseType::PostgreSQL | DatabaseType::MySQL => {
            "Verify the host, port and database of the node".to_string()
        }
        DatabaseType::SQLite => "Verify the file path is accessible".to_string(),
    }
}

impl DbPool {
    /// Open a pool and establish its minimum connections.
    pub async fn connect(kind: DatabaseType, url: &str, opts: &PoolOptions) -> DbResult<Self> {
        let map_connect = |e: sqlx::Error| {
            DbError::connection(
                format!("Failed to connect: {}", e),
                connection_suggestion(kind, &e),
            )
        };

        let pool = match kind {
            DatabaseType::MySQL => {
                let options = MySqlConnectOptions::from_str(url)
                    .map_err(|e| invalid_connection_string(kind, e))?
                    .charset("utf8mb4");
                DbPool::MySql(
                    sqlx_pool_options::<MySql>(opts, false)
                        .connect_with(options)
                        .await
                        .map_err(map_connect)?,
                )
            }
            DatabaseType::PostgreSQL => {
                let options = PgConnectOptions::from_str(url)
                    .map_err(|e| invalid_connection_string(kind, e))?;
                DbPool::Postgres(
                    sqlx_pool_options::<Postgres>(opts, false)
                        .connect_with(options)
                        .await
                        .map_err(map_connect)?,
                )
            }
            DatabaseType::SQLite => {
                let options = SqliteConnectOptions::from_str(url)
                    .map_err(|e| invalid_connection_string(kind, e))?
                    .create_if_missing(true);
                DbPool::SQLite(
                    sqlx_pool_options::<Sqlite>(opts, true)
                        .connect_with(options)
                        .await
                        .map_err(map_connect)?,
                )
            }
        };

        debug!(db_type = %kind, "Connection pool opened");
        Ok(pool)
    }

    /// Create a pool without connecting; connections are established on first use.
    pub fn connect_lazy(kind: DatabaseType, url: &str, opts: &PoolOptions) -> DbResult<Self> {
        Ok(match kind {
            DatabaseType::MySQL => DbPool::MySql(
                sqlx_pool_options::<MySql>(opts, false).connect_lazy_with(
                    MySqlConnectOptions::from_str(url)
                        .map_err(|e| invalid_connection_string(kind, e))?
                        .charset("utf8mb4"),
                ),
            ),
            DatabaseType::PostgreSQL => DbPool::Postgres(
                sqlx_pool_options::<Postgres>(opts, false).connect_lazy_with(
                    PgConnectOptions::from_str(url)
                        .map_err(|e| invalid_connection_string(kind, e))?,
                ),
            ),
            DatabaseType::SQLite => DbPool::SQLite(
                sqlx_pool_options::<Sqlite>(opts, true).connect_lazy_with(
                    SqliteConnectOptions::from_str(url)
                        .map_err(|e| invalid_connection_string(kind, e))?
                        .create_if_missing(true),
                ),
            ),
        })
    }

    /// Run a statement that returns no rows.
    pub async fn execute(&self, sql: &str, params: &[Param]) -> DbResult<ExecResult> {
        Ok(match self {
            DbPool::MySql(pool) => bind_params::<MySql>(sql, params)
                .execute(pool)
                .await?
                .into(),
            DbPool::Postgres(pool) => bind_params::<Postgres>(sql, params)
                .execute(pool)
                .await?
                .into(),
            DbPool::SQLite(pool) => bind_params::<Sqlite>(sql, params)
                .execute(pool)
                .await?
                .into(),
        })
    }

    pub async fn fetch_all(&self, sql: &str, params: &[Param]) -> DbResult<Vec<Record>> {
        match self {
            DbPool::MySql(pool) => bind_params::<MySql>(sql, params)
                .fetch_all(pool)
                .await?
                .iter()
                .map(RowToRecord::to_record)
                .collect(),
            DbPool::Postgres(pool) => bind_params::<Postgres>(sql, params)
                .fetch_all(pool)
                .await?
                .iter()
                .map(RowToRecord::to_record)
                .collect(),
            DbPool::SQLite(pool) => bind_params::<Sqlite>(sql, params)
                .fetch_all(pool)
                .await?
                .iter()
                .map(RowToRecord::to_record)
                .collect(),
        }
    }

    pub async fn fetch_optional(&self, sql: &str, params: &[Param]) -> DbResult<Option<Record>> {
        match self {
            DbPool::MySql(pool) => bind_params::<MySql>(sql, params)
                .fetch_optional(pool)
                .await?
                .map(|row| row.to_record())
                .transpose(),
            DbPool::Postgres(pool) => bind_params::<Postgres>(sql, params)
                .fetch_optional(pool)
                .await?
                .map(|row| row.to_record())
                .transpose(),
            DbPool::SQLite(pool) => bind_params::<Sqlite>(sql, params)
                .fetch_optional(pool)
                .await?
                .map(|row| row.to_record())
                .transpose(),
        }
    }

    /// Prepare `sql` on one pooled connection; the driver caches the statement.
    pub async fn prepare(&self, sql: &str) -> DbResult<()> {
        dispatch!(self, DbPool, pool => {
            pool.prepare(sql).await?;
        });
        Ok(())
    }

    /// Check out a connection and round-trip a ping.
    pub async fn ping(&self) -> DbResult<()> {
        dispatch!(self, DbPool, pool => {
            let mut conn = pool.acquire().await?;
            conn.ping().await?;
        });
        Ok(())
    }

    /// Start a physical transaction.
    pub async fn begin(&self) -> DbResult<DbTransaction> {
        Ok(match self {
            DbPool::MySql(pool) => DbTransaction::MySql(pool.begin().await?),
            DbPool::Postgres(pool) => DbTransaction::Postgres(pool.begin().await?),
            DbPool::SQLite(pool) => DbTransaction::SQLite(pool.begin().await?),
        })
    }

    /// Close the connection pool.
    pub async fn close(&self) {
        dispatch!(self, DbPool, pool => pool.close().await)
    }

    pub fn is_closed(&self) -> bool {
        dispatch!(self, DbPool, pool => pool.is_closed())
    }

    /// Connections currently open, idle or in use.
    pub fn size(&self) -> u32 {
        dispatch!(self, DbPool, pool => pool.size())
    }

    pub fn num_idle(&self) -> usize {
        dispatch!(self, DbPool, pool => pool.num_idle())
    }

    /// Get the database type for this pool.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbPool::MySql(_) => DatabaseType::MySQL,
            DbPool::Postgres(_) => DatabaseType::PostgreSQL,
            DbPool::SQLite(_) => DatabaseType::SQLite,
        }
    }
}

/// Database-specific transaction wrapper.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    // Boxed so the futures stay `Send` when awaited behind `dyn Scope`.
    pub fn execute<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(async move {
            Ok(match self {
                DbTransaction::MySql(tx) => bind_params::<MySql>(sql, params)
                    .execute(&mut **tx)
                    .await?
                    .into(),
                DbTransaction::Postgres(tx) => bind_params::<Postgres>(sql, params)
                    .execute(&mut **tx)
                    .await?
                    .into(),
                DbTransaction::SQLite(tx) => bind_params::<Sqlite>(sql, params)
                    .execute(&mut **tx)
                    .await?
                    .into(),
            })
        })
    }

    pub fn fetch_all<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Vec<Record>>> {
        Box::pin(async move {
            match self {
                DbTransaction::MySql(tx) => bind_params::<MySql>(sql, params)
                    .fetch_all(&mut **tx)
                    .await?
                    .iter()
                    .map(RowToRecord::to_record)
                    .collect(),
                DbTransaction::Postgres(tx) => bind_params::<Postgres>(sql, params)
                    .fetch_all(&mut **tx)
                    .await?
                    .iter()
                    .map(RowToRecord::to_record)
                    .collect(),
                DbTransaction::SQLite(tx) => bind_params::<Sqlite>(sql, params)
                    .fetch_all(&mut **tx)
                    .await?
                    .iter()
                    .map(RowToRecord::to_record)
                    .collect(),
            }
        })
    }

    pub fn fetch_optional<'a>(
        &'a mut self,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Option<Record>>> {
        Box::pin(async move {
            match self {
                DbTransaction::MySql(tx) => bind_params::<MySql>(sql, params)
                    .fetch_optional(&mut **tx)
                    .await?
                    .map(|row| row.to_record())
                    .transpose(),
                DbTransaction::Postgres(tx) => bind_params::<Postgres>(sql, params)
                    .fetch_optional(&mut **tx)
                    .await?
                    .map(|row| row.to_record())
                    .transpose(),
                DbTransaction::SQLite(tx) => bind_params::<Sqlite>(sql, params)
                    .fetch_optional(&mut **tx)
                    .await?
                    .map(|row| row.to_record())
                    .transpose(),
            }
        })
    }

    /// Run an unprepared statement over the text protocol.
    ///
    /// MySQL refuses savepoint statements through the binary protocol. A bare `&str`
    /// carries no arguments, so sqlx sends it without preparing it.
    pub fn exec_raw<'a>(&'a mut self, sql: &'a str) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(async move {
            dispatch!(self, DbTransaction, tx => {
                Executor::execute(&mut **tx, sql).await?;
            });
            Ok(())
        })
    }

    /// Get the database type for this transaction.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbTransaction::MySql(_) => DatabaseType::MySQL,
            DbTransaction::Postgres(_) => DatabaseType::PostgreSQL,
            DbTransaction::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Commit the transaction.
    pub fn commit(self) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(async move {
            dispatch!(self, DbTransaction, tx => tx.commit().await.map_err(DbError::from))
        })
    }

    /// Rollback the transaction.
    pub fn rollback(self) -> BoxFuture<'static, DbResult<()>> {
        Box::pin(async move {
            dispatch!(self, DbTransaction, tx => tx.rollback().await.map_err(DbError::from))
        })
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("DbTransaction").field(&self.db_type()).finish()
    }
}

use super::{Adapter, LockAcquire, LockRelease};
use crate::db::context::Context;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{DataSource, DatabaseType, Param};
use futures_util::future::BoxFuture;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// SQLite has no advisory locks; they are emulated with rows in a lock table.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteAdapter;

/// SQLITE_BUSY, SQLITE_LOCKED and their extended codes.
const DEADLOCK_CODES: &[&str] = &["5", "6", "261", "262", "517"];

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(50);

const CREATE_LOCK_TABLE: &str = "CREATE TABLE IF NOT EXISTS db_cluster_locks (\
     name TEXT PRIMARY KEY, \
     owner TEXT NOT NULL, \
     acquired_at INTEGER NOT NULL)";

impl Adapter for SqliteAdapter {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn kind(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn connection_string(&self, source: &DataSource) -> DbResult<String> {
        if source.database.is_empty() {
            return Err(DbError::invalid_input(
                "SQLite requires a database file path",
            ));
        }
        let mut url = format!("sqlite:{}", source.database);
        if !source.params.is_empty() {
            let query = url::form_urlencoded::Serializer::new(String::new())
                .extend_pairs(&source.params)
                .finish();
            url.push('?');
            url.push_str(&query);
        }
        Ok(url)
    }

    fn is_deadlock(&self, err: &DbError) -> bool {
        err.sql_state()
            .is_some_and(|code| DEADLOCK_CODES.contains(&code))
    }

    /// Lock rows are written in autocommit mode on the master, outside the holding
    /// transaction, so other connections see them immediately.
    fn acquire_lock<'a>(
        &'a self,
        ctx: &'a Context,
        tx: &'a Transaction,
        name: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, DbResult<LockAcquire>> {
        Box::pin(async move {
            let db = tx.database();
            db.exec(ctx, CREATE_LOCK_TABLE, &[]).await?;

            let deadline = Instant::now() + timeout;
            loop {
                let inserted = db
                    .exec(
                        ctx,
                        "INSERT OR IGNORE INTO db_cluster_locks (name, owner, acquired_at) \
                         VALUES (?, ?, ?)",
                        &[
                            Param::from(name),
                            Param::from(tx.id()),
                            Param::Int(chrono::Utc::now().timestamp_millis()),
                        ],
                    )
                    .await?;
                if inserted.rows_affected == 1 {
                    return Ok(LockAcquire::Acquired);
                }
                if Instant::now() >= deadline {
                    return Ok(LockAcquire::TimedOut);
                }
                debug!(lock = %name, "Lock busy, polling");
                let wait = deadline.saturating_duration_since(Instant::now());
                tokio::time::sleep(LOCK_POLL_INTERVAL.min(wait)).await;
            }
        })
    }

    fn release_lock<'a>(
        &'a self,
        ctx: &'a Context,
        tx: &'a Transaction,
        name: &'a str,
    ) -> BoxFuture<'a, DbResult<LockRelease>> {
        Box::pin(async move {
            let db = tx.database();
            let deleted = db
                .exec(
                    ctx,
                    "DELETE FROM db_cluster_locks WHERE name = ? AND owner = ?",
                    &[Param::from(name), Param::from(tx.id())],
                )
                .await?;
            if deleted.rows_affected == 1 {
                return Ok(LockRelease::Released);
            }
            let held = db
                .master()
                .query_row(
                    ctx,
                    "SELECT owner FROM db_cluster_locks WHERE name = ?",
                    &[Param::from(name)],
                )
                .await?;
            Ok(match held {
                Some(_) => LockRelease::NotHeld,
                None => LockRelease::Unknown,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string() {
        let source = DataSource::sqlite("/tmp/shop.db").with_param("mode", "rwc");
        assert_eq!(
            SqliteAdapter.connection_string(&source).unwrap(),
            "sqlite:/tmp/shop.db?mode=rwc"
        );
        assert!(SqliteAdapter.connection_string(&DataSource::default()).is_err());
    }

    #[test]
    fn test_busy_and_locked_are_deadlocks() {
        let adapter = SqliteAdapter;
        for code in ["5", "6", "261", "262", "517"] {
            let err = DbError::database("database is locked", Some(code.to_string()), "");
            assert!(adapter.is_deadlock(&err), "code {code}");
        }
        let constraint = DbError::database("UNIQUE constraint failed", Some("2067".to_string()), "");
        assert!(!adapter.is_deadlock(&constraint));
    }
}

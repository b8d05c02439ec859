use super::{Adapter, LockAcquire, LockRelease, network_url};
use crate::db::context::Context;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{DataSource, DatabaseType, Param};
use futures_util::future::BoxFuture;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresAdapter;

const DEADLOCK_DETECTED: &str = "40P01";
const SERIALIZATION_FAILURE: &str = "40001";
const LOCK_NOT_AVAILABLE: &str = "55P03";

impl Adapter for PostgresAdapter {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn kind(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn connection_string(&self, source: &DataSource) -> DbResult<String> {
        network_url("postgres", source, 5432)
    }

    fn is_deadlock(&self, err: &DbError) -> bool {
        matches!(
            err.sql_state(),
            Some(DEADLOCK_DETECTED | SERIALIZATION_FAILURE)
        )
    }

    /// The lock is transaction-scoped: it ends with the holding transaction, even when the
    /// holder is abandoned and the connection returns to the pool.
    fn acquire_lock<'a>(
        &'a self,
        ctx: &'a Context,
        tx: &'a Transaction,
        name: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, DbResult<LockAcquire>> {
        Box::pin(async move {
            // lock_timeout = 0 disables the timeout
            let millis = timeout.as_millis().max(1);
            tx.exec(ctx, &format!("SET LOCAL lock_timeout = '{millis}ms'"), &[])
                .await?;
            match tx
                .exec(
                    ctx,
                    "SELECT pg_advisory_xact_lock(hashtext($1))",
                    &[Param::from(name)],
                )
                .await
            {
                Ok(_) => Ok(LockAcquire::Acquired),
                Err(e) if e.sql_state() == Some(LOCK_NOT_AVAILABLE) => Ok(LockAcquire::TimedOut),
                Err(e) => Err(e),
            }
        })
    }

    /// Transaction-scoped locks cannot be unlocked early; they go away when the holder
    /// ends. A holder that already ended no longer holds the lock. A lock nobody holds and
    /// a lock held elsewhere look the same here, so `Unknown` is never reported.
    fn release_lock<'a>(
        &'a self,
        ctx: &'a Context,
        tx: &'a Transaction,
        name: &'a str,
    ) -> BoxFuture<'a, DbResult<LockRelease>> {
        Box::pin(async move {
            if !tx.is_active() {
                return Ok(LockRelease::NotHeld);
            }
            let row = tx
                .query_row(
                    ctx,
                    "SELECT EXISTS (\
                     SELECT 1 FROM pg_locks \
                     WHERE locktype = 'advisory' AND pid = pg_backend_pid() AND granted \
                     AND objsubid = 1 AND objid = (hashtext($1)::bigint & 4294967295)::oid) AS held",
                    &[Param::from(name)],
                )
                .await?;
            Ok(match row.and_then(|r| r.get_bool("held")) {
                Some(true) => LockRelease::Released,
                _ => LockRelease::NotHeld,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_default_port() {
        let source = DataSource::new("replica-1", "shop").with_credentials("app", "pw");
        assert_eq!(
            PostgresAdapter.connection_string(&source).unwrap(),
            "postgres://app:pw@replica-1:5432/shop"
        );
    }

    #[test]
    fn test_deadlock_classification() {
        let adapter = PostgresAdapter;
        let state = |code: &str| DbError::database("conflict", Some(code.to_string()), "");

        assert!(adapter.is_deadlock(&state("40P01")));
        assert!(adapter.is_deadlock(&state("40001")));
        assert!(!adapter.is_deadlock(&state("55P03")));
        assert!(!adapter.is_deadlock(&DbError::database("deadlock detected", None, "")));
    }
}

use super::{Adapter, LockAcquire, LockRelease, ceil_secs, network_url};
use crate::db::context::Context;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{DataSource, DatabaseType, Param};
use futures_util::future::BoxFuture;
use std::time::Duration;

/// MySQL and MariaDB.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlAdapter;

const DEADLOCK_STATE: &str = "40001";
const DEADLOCK_MESSAGE: &str = "Deadlock found";

impl Adapter for MySqlAdapter {
    fn name(&self) -> &'static str {
        "mysql"
    }

    fn kind(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn connection_string(&self, source: &DataSource) -> DbResult<String> {
        network_url("mysql", source, 3306)
    }

    fn is_deadlock(&self, err: &DbError) -> bool {
        err.sql_state() == Some(DEADLOCK_STATE)
            || err
                .database_message()
                .is_some_and(|m| m.contains(DEADLOCK_MESSAGE))
    }

    fn acquire_lock<'a>(
        &'a self,
        ctx: &'a Context,
        tx: &'a Transaction,
        name: &'a str,
        timeout: Duration,
    ) -> BoxFuture<'a, DbResult<LockAcquire>> {
        Box::pin(async move {
            let secs = i64::try_from(ceil_secs(timeout)).unwrap_or(i64::MAX);
            let row = tx
                .query_row(
                    ctx,
                    "SELECT GET_LOCK(?, ?) AS acquired",
                    &[Param::from(name), Param::Int(secs)],
                )
                .await?;
            match row.and_then(|r| r.get_i64("acquired")) {
                Some(1) => Ok(LockAcquire::Acquired),
                Some(0) => Ok(LockAcquire::TimedOut),
                // NULL: out of memory or the thread was killed
                _ => Err(DbError::database(
                    format!("GET_LOCK('{name}') returned NULL"),
                    None,
                    "Check the server error log",
                )),
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
            let row = tx
                .query_row(
                    ctx,
                    "SELECT RELEASE_LOCK(?) AS released",
                    &[Param::from(name)],
                )
                .await?;
            Ok(match row.and_then(|r| r.get_i64("released")) {
                Some(1) => LockRelease::Released,
                Some(_) => LockRelease::NotHeld,
                None => LockRelease::Unknown,
            })
        })
    }
}

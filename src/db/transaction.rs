//! Transactions with savepoint-emulated nesting.
//!
//! Level 0 owns a physical transaction on the master. Beginning from an open transaction
//! issues `SAVEPOINT db_cluster_sp_<level>` on the same physical handle, so every level
//! shares one connection and one transaction id.

use crate::db::context::Context;
use crate::db::database::Database;
use crate::db::pool::DbTransaction;
use crate::db::scope::{Scope, Tx};
use crate::error::{DbError, DbResult};
use crate::models::{ClusterId, ExecResult, Param, Record};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

const SAVEPOINT_PREFIX: &str = "db_cluster_sp_";

/// Generate a unique transaction ID.
pub(crate) fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

fn savepoint_name(level: usize) -> String {
    format!("{SAVEPOINT_PREFIX}{level}")
}

/// State shared by every nesting level of one physical transaction.
struct Shared {
    id: String,
    db: Database,
    /// `None` once the physical transaction committed or rolled back.
    handle: Mutex<Option<DbTransaction>>,
    started: Instant,
}

pub struct Transaction {
    shared: Arc<Shared>,
    level: usize,
    active: AtomicBool,
}

impl Transaction {
    /// Begin a physical transaction on the master of `db`.
    pub(crate) async fn begin(db: Database, ctx: &Context) -> DbResult<Self> {
        let started = Instant::now();
        let handle = ctx.run("begin", db.nodes()[0].begin()).await?;
        let id = generate_transaction_id();
        debug!(cluster_id = %db.cluster_id(), transaction_id = %id, "Transaction started");

        Ok(Self {
            shared: Arc::new(Shared {
                id,
                db,
                handle: Mutex::new(Some(handle)),
                started,
            }),
            level: 0,
            active: AtomicBool::new(true),
        })
    }

    /// Open a savepoint one level below this transaction.
    pub async fn begin_nested(&self, ctx: &Context) -> DbResult<Transaction> {
        let level = self.level + 1;
        self.control(ctx, "savepoint", &format!("SAVEPOINT {}", savepoint_name(level)))
            .await?;
        debug!(transaction_id = %self.shared.id, level, "Savepoint created");

        Ok(Self {
            shared: Arc::clone(&self.shared),
            level,
            active: AtomicBool::new(true),
        })
    }

    pub fn id(&self) -> &str {
        &self.shared.id
    }

    pub fn level(&self) -> usize {
        self.level
    }

    /// The logical database this transaction was begun on.
    pub fn database(&self) -> &Database {
        &self.shared.db
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn finished(&self) -> DbError {
        DbError::transaction_finished(&self.shared.id, self.level)
    }

    fn ensure_active(&self) -> DbResult<()> {
        if self.is_active() {
            Ok(())
        } else {
            Err(self.finished())
        }
    }

    /// Send a savepoint statement over the text protocol.
    async fn control(&self, ctx: &Context, operation: &'static str, sql: &str) -> DbResult<()> {
        self.ensure_active()?;
        let mut guard = self.shared.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(|| self.finished())?;
        ctx.run(operation, handle.exec_raw(sql)).await
    }

    pub async fn exec(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<ExecResult> {
        self.ensure_active()?;
        let mut guard = self.shared.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(|| self.finished())?;

        let metrics = self.shared.db.metrics();
        let started = metrics.start();
        let result = ctx.run("exec", handle.execute(sql, params)).await;
        metrics.end_exec(started);
        result
    }

    pub async fn query(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<Vec<Record>> {
        self.ensure_active()?;
        let mut guard = self.shared.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(|| self.finished())?;

        let metrics = self.shared.db.metrics();
        let started = metrics.start();
        let result = ctx.run("query", handle.fetch_all(sql, params)).await;
        metrics.end_query(started);
        result
    }

    pub async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Param],
    ) -> DbResult<Option<Record>> {
        self.ensure_active()?;
        let mut guard = self.shared.handle.lock().await;
        let handle = guard.as_mut().ok_or_else(|| self.finished())?;

        let metrics = self.shared.db.metrics();
        let started = metrics.start();
        let result = ctx.run("query", handle.fetch_optional(sql, params)).await;
        metrics.end_query(started);
        result
    }

    /// Commit this level: a physical commit at level 0, `RELEASE SAVEPOINT` below it.
    ///
    /// A nested level stays active if the release fails, so it can still be rolled back.
    pub async fn commit(&self, ctx: &Context) -> DbResult<()> {
        if self.level > 0 {
            self.control(ctx, "commit", &format!("RELEASE SAVEPOINT {}", savepoint_name(self.level)))
                .await?;
            self.active.store(false, Ordering::Release);
            debug!(transaction_id = %self.shared.id, level = self.level, "Savepoint released");
            return Ok(());
        }

        if !self.active.swap(false, Ordering::AcqRel) {
            return Err(self.finished());
        }
        let handle = self
            .shared
            .handle
            .lock()
            .await
            .take()
            .ok_or_else(|| self.finished())?;
        let result = ctx.run("commit", handle.commit()).await;
        self.shared.db.metrics().end_transaction(self.shared.started);
        debug!(
            transaction_id = %self.shared.id,
            success = result.is_ok(),
            "Transaction committed"
        );
        result
    }

    /// Roll back this level: a physical rollback at level 0, `ROLLBACK TO SAVEPOINT` below it.
    pub async fn rollback(&self) -> DbResult<()> {
        if !self.active.swap(false, Ordering::AcqRel) {
            return Err(self.finished());
        }

        if self.level > 0 {
            let mut guard = self.shared.handle.lock().await;
            let handle = guard.as_mut().ok_or_else(|| self.finished())?;
            handle
                .exec_raw(&format!("ROLLBACK TO SAVEPOINT {}", savepoint_name(self.level)))
                .await?;
            debug!(transaction_id = %self.shared.id, level = self.level, "Rolled back to savepoint");
            return Ok(());
        }

        let handle = self
            .shared
            .handle
            .lock()
            .await
            .take()
            .ok_or_else(|| self.finished())?;
        let result = handle.rollback().await;
        self.shared.db.metrics().end_transaction(self.shared.started);
        debug!(transaction_id = %self.shared.id, "Transaction rolled back");
        result
    }
}

impl std::fmt::Debug for Transaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.shared.id)
            .field("cluster_id", &self.shared.db.cluster_id())
            .field("level", &self.level)
            .field("active", &self.is_active())
            .finish()
    }
}

impl Scope for Transaction {
    fn cluster_id(&self) -> ClusterId {
        self.shared.db.cluster_id()
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(Transaction::exec(self, ctx, sql, params))
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Vec<Record>>> {
        Box::pin(Transaction::query(self, ctx, sql, params))
    }

    fn query_row<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Option<Record>>> {
        Box::pin(Transaction::query_row(self, ctx, sql, params))
    }

    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<Arc<dyn Tx>>> {
        Box::pin(async move {
            let tx: Arc<dyn Tx> = Arc::new(self.begin_nested(ctx).await?);
            Ok(tx)
        })
    }
}

impl Tx for Transaction {
    fn id(&self) -> &str {
        &self.shared.id
    }

    fn level(&self) -> usize {
        self.level
    }

    fn commit<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(Transaction::commit(self, ctx))
    }

    fn rollback(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(Transaction::rollback(self))
    }

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope> {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolOptions;
    use crate::db::adapter::SqliteAdapter;
    use crate::db::pool::DbPool;
    use crate::models::DatabaseType;

    /// One connection, so the transaction and the checks share the in-memory database.
    async fn memory_db() -> Database {
        let opts = PoolOptions {
            max_connections: Some(1),
            ..Default::default()
        };
        let pool = DbPool::connect_lazy(DatabaseType::SQLite, "sqlite::memory:", &opts).unwrap();
        let db = Database::from_pools(7, Arc::new(SqliteAdapter), vec![pool]).unwrap();
        db.exec(&Context::new(), "CREATE TABLE t (id INTEGER)", &[])
            .await
            .unwrap();
        db
    }

    async fn ids(db: &Database) -> Vec<i64> {
        db.query(&Context::new(), "SELECT id FROM t ORDER BY id", &[])
            .await
            .unwrap()
            .iter()
            .filter_map(|r| r.get_i64("id"))
            .collect()
    }

    #[test]
    fn test_transaction_id_format() {
        let id = generate_transaction_id();
        assert!(id.starts_with("tx_"));
        assert_eq!(id.len(), 35);
        assert_ne!(id, generate_transaction_id());
    }

    #[tokio::test]
    async fn test_nested_commit_keeps_all_work() {
        let db = memory_db().await;
        let ctx = Context::new();

        let outer = db.begin(&ctx).await.unwrap();
        outer.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await.unwrap();
        let inner = outer.begin_nested(&ctx).await.unwrap();
        assert_eq!(inner.level(), 1);
        assert_eq!(inner.id(), outer.id());
        inner.exec(&ctx, "INSERT INTO t VALUES (2)", &[]).await.unwrap();
        inner.commit(&ctx).await.unwrap();
        outer.commit(&ctx).await.unwrap();

        assert_eq!(ids(&db).await, [1, 2]);
    }

    #[tokio::test]
    async fn test_nested_rollback_discards_inner_work_only() {
        let db = memory_db().await;
        let ctx = Context::new();

        let outer = db.begin(&ctx).await.unwrap();
        outer.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await.unwrap();
        let inner = outer.begin_nested(&ctx).await.unwrap();
        inner.exec(&ctx, "INSERT INTO t VALUES (2)", &[]).await.unwrap();
        inner.rollback().await.unwrap();
        outer.exec(&ctx, "INSERT INTO t VALUES (3)", &[]).await.unwrap();
        outer.commit(&ctx).await.unwrap();

        assert_eq!(ids(&db).await, [1, 3]);
    }

    #[tokio::test]
    async fn test_finished_level_rejects_commit_and_rollback() {
        let db = memory_db().await;
        let ctx = Context::new();

        let outer = db.begin(&ctx).await.unwrap();
        let inner = outer.begin_nested(&ctx).await.unwrap();
        inner.commit(&ctx).await.unwrap();
        assert!(matches!(
            inner.commit(&ctx).await,
            Err(DbError::TransactionFinished { level: 1, .. })
        ));
        assert!(matches!(
            inner.rollback().await,
            Err(DbError::TransactionFinished { level: 1, .. })
        ));
        assert!(matches!(
            inner.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await,
            Err(DbError::TransactionFinished { .. })
        ));

        outer.rollback().await.unwrap();
        assert!(matches!(
            outer.rollback().await,
            Err(DbError::TransactionFinished { level: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_nested_level_unusable_after_physical_commit() {
        let db = memory_db().await;
        let ctx = Context::new();

        let outer = db.begin(&ctx).await.unwrap();
        let inner = outer.begin_nested(&ctx).await.unwrap();
        outer.commit(&ctx).await.unwrap();

        assert!(matches!(
            inner.query(&ctx, "SELECT id FROM t", &[]).await,
            Err(DbError::TransactionFinished { level: 1, .. })
        ));
        assert!(matches!(
            inner.begin_nested(&ctx).await,
            Err(DbError::TransactionFinished { .. })
        ));
    }

    #[tokio::test]
    async fn test_statements_and_transactions_are_metered() {
        let db = memory_db().await;
        let ctx = Context::new();
        let before = db.metrics().snapshot();

        let outer = db.begin(&ctx).await.unwrap();
        let inner = outer.begin_nested(&ctx).await.unwrap();
        inner.exec(&ctx, "INSERT INTO t VALUES (1)", &[]).await.unwrap();
        inner.query_row(&ctx, "SELECT id FROM t", &[]).await.unwrap();
        inner.commit(&ctx).await.unwrap();
        outer.commit(&ctx).await.unwrap();

        let after = db.metrics().snapshot();
        assert_eq!(after.exec_count - before.exec_count, 1);
        assert_eq!(after.query_count - before.query_count, 1);
        assert_eq!(after.transaction_count - before.transaction_count, 1);
    }
}

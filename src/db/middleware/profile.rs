use crate::db::context::Context;
use crate::db::database::Database;
use crate::db::scope::{LogicalDatabase, Scope, Tx};
use crate::error::DbResult;
use crate::models::{ClusterId, ExecResult, Param, Record};
use futures_util::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Times statements and logs them, warning about the slow ones.
#[derive(Debug, Clone, Copy)]
pub struct Profiler {
    cluster_id: ClusterId,
    slow_threshold: Option<Duration>,
}

impl Profiler {
    pub fn new(cluster_id: ClusterId, slow_threshold: Option<Duration>) -> Self {
        Self {
            cluster_id,
            slow_threshold,
        }
    }

    pub fn slow_threshold(&self) -> Option<Duration> {
        self.slow_threshold
    }

    pub fn is_slow(&self, elapsed: Duration) -> bool {
        self.slow_threshold.is_some_and(|t| elapsed >= t)
    }

    /// Await `fut` and log how long it took.
    pub async fn observe<T, F>(
        &self,
        operation: &'static str,
        level: Option<usize>,
        sql: &str,
        fut: F,
    ) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        let started = Instant::now();
        let result = fut.await;
        let elapsed = started.elapsed();
        let elapsed_ms = elapsed.as_secs_f64() * 1000.0;

        if self.is_slow(elapsed) {
            warn!(
                cluster_id = %self.cluster_id,
                operation,
                level,
                elapsed_ms,
                success = result.is_ok(),
                sql,
                "Slow statement"
            );
        } else {
            debug!(
                cluster_id = %self.cluster_id,
                operation,
                level,
                elapsed_ms,
                success = result.is_ok(),
                sql,
                "Statement finished"
            );
        }
        result
    }
}

/// Profiles every statement run on the database or in a transaction begun through it.
pub struct ProfiledDatabase {
    inner: Arc<dyn LogicalDatabase>,
    profiler: Profiler,
}

impl ProfiledDatabase {
    pub fn new(inner: Arc<dyn LogicalDatabase>, slow_threshold: Option<Duration>) -> Self {
        let profiler = Profiler::new(inner.cluster_id(), slow_threshold);
        Self { inner, profiler }
    }

    pub fn profiler(&self) -> &Profiler {
        &self.profiler
    }
}

impl Scope for ProfiledDatabase {
    fn cluster_id(&self) -> ClusterId {
        self.inner.cluster_id()
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(
            self.profiler
                .observe("exec", None, sql, self.inner.exec(ctx, sql, params)),
        )
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Vec<Record>>> {
        Box::pin(
            self.profiler
                .observe("query", None, sql, self.inner.query(ctx, sql, params)),
        )
    }

    fn query_row<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Option<Record>>> {
        Box::pin(
            self.profiler
                .observe("query_row", None, sql, self.inner.query_row(ctx, sql, params)),
        )
    }

    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<Arc<dyn Tx>>> {
        Box::pin(async move {
            let tx = self.inner.begin(ctx).await?;
            let tx: Arc<dyn Tx> = Arc::new(ProfiledTx::new(tx, self.profiler));
            Ok(tx)
        })
    }
}

impl LogicalDatabase for ProfiledDatabase {
    fn database(&self) -> &Database {
        self.inner.database()
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>> {
        self.inner.close()
    }

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope> {
        self
    }
}

/// A transaction whose statements, savepoints and commits are profiled.
pub struct ProfiledTx {
    inner: Arc<dyn Tx>,
    profiler: Profiler,
}

impl ProfiledTx {
    pub fn new(inner: Arc<dyn Tx>, profiler: Profiler) -> Self {
        Self { inner, profiler }
    }
}

impl Scope for ProfiledTx {
    fn cluster_id(&self) -> ClusterId {
        self.inner.cluster_id()
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(self.profiler.observe(
            "exec",
            Some(self.inner.level()),
            sql,
            self.inner.exec(ctx, sql, params),
        ))
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Vec<Record>>> {
        Box::pin(self.profiler.observe(
            "query",
            Some(self.inner.level()),
            sql,
            self.inner.query(ctx, sql, params),
        ))
    }

    fn query_row<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Option<Record>>> {
        Box::pin(self.profiler.observe(
            "query_row",
            Some(self.inner.level()),
            sql,
            self.inner.query_row(ctx, sql, params),
        ))
    }

    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<Arc<dyn Tx>>> {
        Box::pin(async move {
            let nested = self
                .profiler
                .observe("savepoint", Some(self.inner.level() + 1), "", self.inner.begin(ctx))
                .await?;
            let tx: Arc<dyn Tx> = Arc::new(ProfiledTx::new(nested, self.profiler));
            Ok(tx)
        })
    }
}

impl Tx for ProfiledTx {
    fn id(&self) -> &str {
        self.inner.id()
    }

    fn level(&self) -> usize {
        self.inner.level()
    }

    fn commit<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(
            self.profiler
                .observe("commit", Some(self.inner.level()), "", self.inner.commit(ctx)),
        )
    }

    fn rollback(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(
            self.profiler
                .observe("rollback", Some(self.inner.level()), "", self.inner.rollback()),
        )
    }

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope> {
        self
    }
}

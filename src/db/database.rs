//! The logical database: one master and zero or more read replicas.
//!
//! Writes and transactions go to node 0. Reads rotate over nodes 1..N with a lock-free
//! cursor; a single-node database serves both roles from node 0.

use crate::config::PoolOptions;
use crate::db::adapter::{Adapter, AdapterRegistry};
use crate::db::context::Context;
use crate::db::fanout::{first_error, scatter};
use crate::db::metrics::Metrics;
use crate::db::pool::DbPool;
use crate::db::scope::{LogicalDatabase, Scope, Tx};
use crate::db::statement::Statement;
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use crate::models::{Cluster, ClusterId, ExecResult, Param, Record};
use futures_util::future::{BoxFuture, join_all};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Connection counts of one node's pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    pub node: usize,
    pub size: u32,
    pub idle: usize,
    pub closed: bool,
}

struct Inner {
    cluster_id: ClusterId,
    adapter: Arc<dyn Adapter>,
    nodes: Vec<DbPool>,
    metrics: Arc<Metrics>,
    /// Only present when there are replicas to rotate over.
    cursor: Option<AtomicUsize>,
    /// Views share the pools but never close them.
    owned: bool,
    /// Shared with views so they observe the owner closing.
    closed: Arc<AtomicBool>,
    closing: AtomicBool,
    /// Background work that still needs the pools, shared with views.
    cleanups: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

/// Cheap to clone; clones share pools, cursor and metrics.
#[derive(Clone)]
pub struct Database {
    inner: Arc<Inner>,
}

impl Database {
    /// Connect to every node of `cluster` concurrently.
    ///
    /// If any node fails, the pools already opened are closed and the first error in node
    /// order is returned.
    pub async fn open(
        registry: &AdapterRegistry,
        cluster: &Cluster,
        options: &PoolOptions,
    ) -> DbResult<Self> {
        let adapter = registry.get(cluster.driver())?;
        options.validate().map_err(DbError::invalid_input)?;

        let kind = adapter.kind();
        let urls = cluster
            .nodes()
            .iter()
            .map(|node| adapter.connection_string(node))
            .collect::<DbResult<Vec<_>>>()?;

        let results = join_all(urls.iter().map(|url| DbPool::connect(kind, url, options))).await;
        let mut nodes = Vec::with_capacity(results.len());
        let mut failure = None;
        for result in results {
            match result {
                Ok(pool) => nodes.push(pool),
                Err(e) if failure.is_none() => failure = Some(e),
                Err(_) => {}
            }
        }
        if let Some(err) = failure {
            join_all(nodes.iter().map(DbPool::close)).await;
            return Err(err);
        }

        info!(
            cluster_id = %cluster.id(),
            driver = %cluster.driver(),
            nodes = nodes.len(),
            "Logical database opened"
        );
        Ok(Self::assemble(
            cluster.id(),
            adapter,
            nodes,
            Arc::new(Metrics::new()),
            true,
            Arc::new(AtomicBool::new(false)),
            Arc::default(),
        ))
    }

    /// Build a database over pools opened elsewhere. Node 0 is the master.
    pub fn from_pools(
        cluster_id: impl Into<ClusterId>,
        adapter: Arc<dyn Adapter>,
        pools: Vec<DbPool>,
    ) -> DbResult<Self> {
        if pools.is_empty() {
            return Err(DbError::invalid_input(
                "A logical database needs at least one node (the master)",
            ));
        }
        if let Some(pool) = pools.iter().find(|p| p.db_type() != adapter.kind()) {
            return Err(DbError::invalid_input(format!(
                "Adapter '{}' cannot drive a {} pool",
                adapter.name(),
                pool.db_type()
            )));
        }
        Ok(Self::assemble(
            cluster_id.into(),
            adapter,
            pools,
            Arc::new(Metrics::new()),
            true,
            Arc::new(AtomicBool::new(false)),
            Arc::default(),
        ))
    }

    fn assemble(
        cluster_id: ClusterId,
        adapter: Arc<dyn Adapter>,
        nodes: Vec<DbPool>,
        metrics: Arc<Metrics>,
        owned: bool,
        closed: Arc<AtomicBool>,
        cleanups: Arc<Mutex<Vec<JoinHandle<()>>>>,
    ) -> Self {
        let cursor = (nodes.len() > 1).then(|| AtomicUsize::new(0));
        Self {
            inner: Arc::new(Inner {
                cluster_id,
                adapter,
                nodes,
                metrics,
                cursor,
                owned,
                closed,
                closing: AtomicBool::new(false),
                cleanups,
            }),
        }
    }

    pub fn cluster_id(&self) -> ClusterId {
        self.inner.cluster_id
    }

    pub fn adapter(&self) -> &Arc<dyn Adapter> {
        &self.inner.adapter
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.inner.metrics
    }

    /// Physical pools, master first.
    pub fn nodes(&self) -> &[DbPool] {
        &self.inner.nodes
    }

    pub fn node_count(&self) -> usize {
        self.inner.nodes.len()
    }

    /// Next node to serve a read.
    pub fn replica_index(&self) -> usize {
        match &self.inner.cursor {
            Some(cursor) => {
                1 + cursor.fetch_add(1, Ordering::Relaxed) % (self.inner.nodes.len() - 1)
            }
            None => 0,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::closed(self.inner.cluster_id.0));
        }
        Ok(())
    }

    fn master_pool(&self) -> &DbPool {
        &self.inner.nodes[0]
    }

    /// Run a statement on the master.
    pub async fn exec(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<ExecResult> {
        self.ensure_open()?;
        let metrics = &self.inner.metrics;
        let started = metrics.start();
        let result = ctx
            .run("exec", self.master_pool().execute(sql, params))
            .await;
        metrics.end_exec(started);
        result
    }

    /// Run a query on the next replica.
    pub async fn query(&self, ctx: &Context, sql: &str, params: &[Param]) -> DbResult<Vec<Record>> {
        self.ensure_open()?;
        let pool = &self.inner.nodes[self.replica_index()];
        let metrics = &self.inner.metrics;
        let started = metrics.start();
        let result = ctx.run("query", pool.fetch_all(sql, params)).await;
        metrics.end_query(started);
        result
    }

    pub async fn query_row(
        &self,
        ctx: &Context,
        sql: &str,
        params: &[Param],
    ) -> DbResult<Option<Record>> {
        self.ensure_open()?;
        let pool = &self.inner.nodes[self.replica_index()];
        let metrics = &self.inner.metrics;
        let started = metrics.start();
        let result = ctx.run("query", pool.fetch_optional(sql, params)).await;
        metrics.end_query(started);
        result
    }

    /// Begin a physical transaction on the master.
    pub async fn begin(&self, ctx: &Context) -> DbResult<Transaction> {
        self.ensure_open()?;
        Transaction::begin(self.clone(), ctx).await
    }

    /// Prepare `sql` on every node; fails if any node rejects it.
    pub async fn prepare(&self, ctx: &Context, sql: &str) -> DbResult<Statement> {
        self.ensure_open()?;
        ctx.run(
            "prepare",
            scatter(&self.inner.nodes, |_, pool| pool.prepare(sql)),
        )
        .await?;
        Ok(Statement::new(self.clone(), sql))
    }

    /// Ping every node concurrently. All nodes are attempted.
    pub async fn ping(&self, ctx: &Context) -> DbResult<()> {
        self.ensure_open()?;
        let results = ctx
            .run("ping", async {
                Ok::<_, DbError>(join_all(self.inner.nodes.iter().map(DbPool::ping)).await)
            })
            .await?;
        for (node, result) in results.iter().enumerate() {
            if let Err(e) = result {
                debug!(cluster_id = %self.inner.cluster_id, node, error = %e, "Node ping failed");
            }
        }
        first_error(results)
    }

    /// Register a task that must finish before the pools close.
    pub(crate) fn track_cleanup(&self, handle: JoinHandle<()>) {
        let mut cleanups = self
            .inner
            .cleanups
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        cleanups.retain(|task| !task.is_finished());
        cleanups.push(handle);
    }

    /// Close every pool. Closing again, or closing a view, does nothing.
    ///
    /// Pending cleanup tasks run to completion first, while the database still accepts work.
    pub async fn close(&self) -> DbResult<()> {
        if !self.inner.owned || self.inner.closing.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let pending = std::mem::take(
            &mut *self
                .inner
                .cleanups
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if !pending.is_empty() {
            debug!(
                cluster_id = %self.inner.cluster_id,
                tasks = pending.len(),
                "Waiting for cleanup tasks"
            );
            join_all(pending).await;
        }
        self.inner.closed.store(true, Ordering::Release);
        scatter(&self.inner.nodes, |_, pool| async move {
            pool.close().await;
            Ok(())
        })
        .await?;
        info!(cluster_id = %self.inner.cluster_id, "Logical database closed");
        Ok(())
    }

    pub fn pool_status(&self) -> Vec<PoolStatus> {
        self.inner
            .nodes
            .iter()
            .enumerate()
            .map(|(node, pool)| PoolStatus {
                node,
                size: pool.size(),
                idle: pool.num_idle(),
                closed: pool.is_closed(),
            })
            .collect()
    }

    /// Single-node view over the master.
    pub fn master(&self) -> Database {
        self.view(0)
    }

    /// Single-node view over the next replica (the master when there are none).
    pub fn slave(&self) -> Database {
        self.view(self.replica_index())
    }

    fn view(&self, node: usize) -> Database {
        Self::assemble(
            self.inner.cluster_id,
            Arc::clone(&self.inner.adapter),
            vec![self.inner.nodes[node].clone()],
            Arc::clone(&self.inner.metrics),
            false,
            Arc::clone(&self.inner.closed),
            Arc::clone(&self.inner.cleanups),
        )
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("cluster_id", &self.inner.cluster_id)
            .field("adapter", &self.inner.adapter.name())
            .field("nodes", &self.inner.nodes.len())
            .field("owned", &self.inner.owned)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Scope for Database {
    fn cluster_id(&self) -> ClusterId {
        self.inner.cluster_id
    }

    fn exec<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<ExecResult>> {
        Box::pin(Database::exec(self, ctx, sql, params))
    }

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Vec<Record>>> {
        Box::pin(Database::query(self, ctx, sql, params))
    }

    fn query_row<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Option<Record>>> {
        Box::pin(Database::query_row(self, ctx, sql, params))
    }

    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<Arc<dyn Tx>>> {
        Box::pin(async move {
            let tx: Arc<dyn Tx> = Arc::new(Database::begin(self, ctx).await?);
            Ok(tx)
        })
    }
}

impl LogicalDatabase for Database {
    fn database(&self) -> &Database {
        self
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(Database::close(self))
    }

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope> {
        self
    }
}

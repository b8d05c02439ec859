//! Capabilities shared by logical databases and transactions.
//!
//! Code that runs statements takes an `Arc<dyn Scope>` and does not care whether it is
//! inside a transaction. Object-safe async methods return boxed futures.

use crate::db::adapter::Adapter;
use crate::db::context::Context;
use crate::db::database::Database;
use crate::db::metrics::Metrics;
use crate::db::statement::Statement;
use crate::error::DbResult;
use crate::models::{ClusterId, ExecResult, Param, Record};
use futures_util::future::BoxFuture;
use std::sync::Arc;

/// Something statements can run against: a logical database or an open transaction.
pub trait Scope: Send + Sync {
    fn cluster_id(&self) -> ClusterId;

    fn exec<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<ExecResult>>;

    fn query<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Vec<Record>>>;

    /// First row of the result, or `None` when the query returns nothing.
    fn query_row<'a>(
        &'a self,
        ctx: &'a Context,
        sql: &'a str,
        params: &'a [Param],
    ) -> BoxFuture<'a, DbResult<Option<Record>>>;

    /// Begin a transaction: a physical one from a database, a savepoint from a transaction.
    fn begin<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<Arc<dyn Tx>>>;
}

/// An open transaction at some nesting level.
pub trait Tx: Scope {
    /// Identifier shared by every level of one physical transaction.
    fn id(&self) -> &str;

    /// 0 for the physical transaction, 1.. for savepoints.
    fn level(&self) -> usize;

    fn commit<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<()>>;

    /// Roll back this level. Not bound by any deadline.
    fn rollback(&self) -> BoxFuture<'_, DbResult<()>>;

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope>;
}

/// A logical database, possibly wrapped by decorators.
pub trait LogicalDatabase: Scope {
    /// The undecorated database at the bottom of the chain.
    fn database(&self) -> &Database;

    fn adapter(&self) -> &Arc<dyn Adapter> {
        self.database().adapter()
    }

    fn metrics(&self) -> &Arc<Metrics> {
        self.database().metrics()
    }

    fn ping<'a>(&'a self, ctx: &'a Context) -> BoxFuture<'a, DbResult<()>> {
        Box::pin(self.database().ping(ctx))
    }

    fn prepare<'a>(&'a self, ctx: &'a Context, sql: &'a str) -> BoxFuture<'a, DbResult<Statement>> {
        Box::pin(self.database().prepare(ctx, sql))
    }

    /// Single-node view over the master.
    fn master(&self) -> Database {
        self.database().master()
    }

    /// Single-node view over the next replica in rotation.
    fn slave(&self) -> Database {
        self.database().slave()
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>>;

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope>;
}

use crate::db::context::Context;
use crate::db::database::Database;
use crate::error::DbResult;
use crate::models::{ExecResult, Param, Record};
use std::sync::Arc;

/// A statement prepared on every node of a logical database.
///
/// Each call routes like a direct call would: `exec` to the master, queries to the next
/// replica. The drivers keep the prepared handles in their per-connection caches.
#[derive(Debug, Clone)]
pub struct Statement {
    sql: Arc<str>,
    db: Database,
}

impl Statement {
    pub(crate) fn new(db: Database, sql: &str) -> Self {
        Self {
            sql: Arc::from(sql),
            db,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub async fn exec(&self, ctx: &Context, params: &[Param]) -> DbResult<ExecResult> {
        self.db.exec(ctx, &self.sql, params).await
    }

    pub async fn query(&self, ctx: &Context, params: &[Param]) -> DbResult<Vec<Record>> {
        self.db.query(ctx, &self.sql, params).await
    }

    pub async fn query_row(&self, ctx: &Context, params: &[Param]) -> DbResult<Option<Record>> {
        self.db.query_row(ctx, &self.sql, params).await
    }
}

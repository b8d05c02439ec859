//! Request-scoped context.
//!
//! A `Context` is passed by reference into every database call. It carries the scopes
//! (open transactions) bound for each logical database and an optional deadline. Deriving a
//! context never mutates the parent, so a transaction bound in a child is invisible to the
//! caller once the child is dropped.

use crate::db::scope::Scope;
use crate::error::{DbError, DbResult};
use crate::models::ClusterId;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

struct Binding {
    cluster_id: ClusterId,
    scope: Arc<dyn Scope>,
    parent: Option<Arc<Binding>>,
}

#[derive(Clone, Default)]
pub struct Context {
    scopes: Option<Arc<Binding>>,
    deadline: Option<Instant>,
}

impl Context {
    /// Root context: nothing bound, no deadline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Derive a context with `scope` bound under its cluster id.
    pub fn with_scope(&self, scope: Arc<dyn Scope>) -> Self {
        Self {
            scopes: Some(Arc::new(Binding {
                cluster_id: scope.cluster_id(),
                scope,
                parent: self.scopes.clone(),
            })),
            deadline: self.deadline,
        }
    }

    /// Innermost scope bound for `cluster_id`.
    pub fn scope(&self, cluster_id: ClusterId) -> Option<Arc<dyn Scope>> {
        let mut cursor = self.scopes.as_deref();
        while let Some(binding) = cursor {
            if binding.cluster_id == cluster_id {
                return Some(Arc::clone(&binding.scope));
            }
            cursor = binding.parent.as_deref();
        }
        None
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`, or at the parent's deadline if earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            scopes: self.scopes.clone(),
            deadline: Some(match self.deadline {
                Some(current) => current.min(deadline),
                None => deadline,
            }),
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn is_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Drive `fut` to completion unless the deadline passes first.
    pub async fn run<T, F>(&self, operation: &'static str, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        match self.deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fut)
                .await
                .map_err(|_| DbError::deadline_exceeded(operation))?,
            None => fut.await,
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut bound = Vec::new();
        let mut cursor = self.scopes.as_deref();
        while let Some(binding) = cursor {
            bound.push(binding.cluster_id);
            cursor = binding.parent.as_deref();
        }
        f.debug_struct("Context")
            .field("scopes", &bound)
            .field("deadline", &self.deadline)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::scope::Tx;
    use crate::models::{ExecResult, Param, Record};
    use futures_util::future::BoxFuture;

    struct Marker(ClusterId, &'static str);

    impl Scope for Marker {
        fn cluster_id(&self) -> ClusterId {
            self.0
        }

        fn exec<'a>(
            &'a self,
            _ctx: &'a Context,
            _sql: &'a str,
            _params: &'a [Param],
        ) -> BoxFuture<'a, DbResult<ExecResult>> {
            Box::pin(async { Ok(ExecResult::default()) })
        }

        fn query<'a>(
            &'a self,
            _ctx: &'a Context,
            _sql: &'a str,
            _params: &'a [Param],
        ) -> BoxFuture<'a, DbResult<Vec<Record>>> {
            let name = self.1;
            Box::pin(async move {
                Ok(vec![
                    [("name".to_string(), serde_json::json!(name))]
                        .into_iter()
                        .collect(),
                ])
            })
        }

        fn query_row<'a>(
            &'a self,
            _ctx: &'a Context,
            _sql: &'a str,
            _params: &'a [Param],
        ) -> BoxFuture<'a, DbResult<Option<Record>>> {
            Box::pin(async { Ok(None) })
        }

        fn begin<'a>(&'a self, _ctx: &'a Context) -> BoxFuture<'a, DbResult<Arc<dyn Tx>>> {
            Box::pin(async { Err(DbError::internal("not supported")) })
        }
    }

    async fn name_of(scope: Arc<dyn Scope>) -> String {
        let ctx = Context::new();
        let rows = scope.query(&ctx, "", &[]).await.unwrap();
        rows[0].get_str("name").unwrap().to_string()
    }

    #[tokio::test]
    async fn test_scope_lookup_innermost_wins() {
        let root = Context::new();
        assert!(root.scope(ClusterId(1)).is_none());

        let outer = root.with_scope(Arc::new(Marker(ClusterId(1), "outer")));
        let other = outer.with_scope(Arc::new(Marker(ClusterId(2), "other")));
        let inner = other.with_scope(Arc::new(Marker(ClusterId(1), "inner")));

        assert_eq!(name_of(inner.scope(ClusterId(1)).unwrap()).await, "inner");
        assert_eq!(name_of(inner.scope(ClusterId(2)).unwrap()).await, "other");
        assert_eq!(name_of(outer.scope(ClusterId(1)).unwrap()).await, "outer");
        assert!(outer.scope(ClusterId(2)).is_none());
        assert!(root.scope(ClusterId(1)).is_none());
    }

    #[test]
    fn test_derived_deadline_never_extends() {
        let parent = Context::new().with_timeout(Duration::from_millis(50));
        let child = parent.with_timeout(Duration::from_secs(60));
        assert_eq!(child.deadline(), parent.deadline());

        let tighter = parent.with_timeout(Duration::from_millis(1));
        assert!(tighter.deadline() < parent.deadline());
    }

    #[tokio::test]
    async fn test_run_reports_deadline_exceeded() {
        let ctx = Context::new().with_timeout(Duration::from_millis(10));
        let result: DbResult<()> = ctx
            .run("sleep", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(DbError::DeadlineExceeded { .. })));
        assert!(ctx.is_expired());
    }

    #[tokio::test]
    async fn test_run_without_deadline_passes_through() {
        let ctx = Context::new();
        assert_eq!(ctx.run("noop", async { Ok(5) }).await.unwrap(), 5);
        assert!(!ctx.is_expired());
    }
}

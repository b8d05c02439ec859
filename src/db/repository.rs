//! Units of work with automatic deadlock retry.

use crate::db::context::Context;
use crate::db::scope::{LogicalDatabase, Scope, Tx};
use crate::error::{DbError, DbResult};
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

/// Attempts per unit of work before the last deadlock error is returned.
pub const MAX_TRANSACTION_ATTEMPTS: usize = 100;

/// Runs units of work in transactions on one logical database.
///
/// Work already running inside a transaction for the same database (bound in the context)
/// joins it through a savepoint instead of starting a new physical transaction.
#[derive(Clone)]
pub struct Repository {
    db: Arc<dyn LogicalDatabase>,
    max_attempts: usize,
}

impl Repository {
    pub fn new(db: Arc<dyn LogicalDatabase>) -> Self {
        Self {
            db,
            max_attempts: MAX_TRANSACTION_ATTEMPTS,
        }
    }

    /// Override the attempt limit (at least one attempt is always made).
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn database(&self) -> &Arc<dyn LogicalDatabase> {
        &self.db
    }

    /// The innermost transaction bound for this database, or the database itself.
    pub fn scope(&self, ctx: &Context) -> Arc<dyn Scope> {
        ctx.scope(self.db.cluster_id())
            .unwrap_or_else(|| Arc::clone(&self.db).into_scope())
    }

    /// Run `unit` in a transaction and commit it.
    ///
    /// Any error rolls the transaction back and is returned. A deadlock, as classified by the
    /// adapter, restarts the whole unit in a fresh transaction. Only the outermost level
    /// retries: after a deadlock the physical transaction is gone, so a nested unit passes the
    /// error up to the runner that owns it.
    pub async fn transaction<T, F, Fut>(&self, ctx: &Context, mut unit: F) -> DbResult<T>
    where
        F: FnMut(Context, Arc<dyn Scope>) -> Fut,
        Fut: Future<Output = DbResult<T>>,
    {
        let adapter = Arc::clone(self.db.adapter());
        let mut attempt = 1;
        loop {
            let tx = self.scope(ctx).begin(ctx).await?;
            let level = tx.level();

            let err = match run_once(ctx, tx, &mut unit).await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            let retry = level == 0
                && adapter.is_deadlock(&err)
                && attempt < self.max_attempts
                && !ctx.is_expired();
            if !retry {
                return Err(err);
            }

            warn!(
                cluster_id = %self.db.cluster_id(),
                attempt,
                error = %err,
                "Deadlock detected, retrying transaction"
            );
            attempt += 1;
        }
    }
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("cluster_id", &self.db.cluster_id())
            .field("max_attempts", &self.max_attempts)
            .finish()
    }
}

async fn run_once<T, F, Fut>(ctx: &Context, tx: Arc<dyn Tx>, unit: &mut F) -> DbResult<T>
where
    F: FnMut(Context, Arc<dyn Scope>) -> Fut,
    Fut: Future<Output = DbResult<T>>,
{
    let guard = RollbackGuard::new(Arc::clone(&tx));
    let scope = tx.into_scope();
    let child = ctx.with_scope(Arc::clone(&scope));

    match unit(child, scope).await {
        Ok(value) => {
            guard.commit(ctx).await?;
            Ok(value)
        }
        Err(err) => {
            guard.rollback().await;
            Err(err)
        }
    }
}

/// Rolls the transaction back unless it was committed.
///
/// Dropping the guard without finishing (a panic in the unit of work, or the caller dropping
/// the future) spawns the rollback on the current runtime.
struct RollbackGuard {
    tx: Option<Arc<dyn Tx>>,
}

impl RollbackGuard {
    fn new(tx: Arc<dyn Tx>) -> Self {
        Self { tx: Some(tx) }
    }

    async fn commit(mut self, ctx: &Context) -> DbResult<()> {
        let Some(tx) = self.tx.take() else {
            return Ok(());
        };
        if let Err(err) = tx.commit(ctx).await {
            rollback_quietly(&tx).await;
            return Err(err);
        }
        Ok(())
    }

    async fn rollback(mut self) {
        if let Some(tx) = self.tx.take() {
            rollback_quietly(&tx).await;
        }
    }
}

impl Drop for RollbackGuard {
    fn drop(&mut self) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move { rollback_quietly(&tx).await });
            }
            Err(_) => {
                warn!(
                    transaction_id = %tx.id(),
                    "No runtime to roll back an abandoned transaction; the driver will discard it"
                );
            }
        }
    }
}

/// Roll back, logging instead of returning failures: the caller already has an error.
async fn rollback_quietly(tx: &Arc<dyn Tx>) {
    match tx.rollback().await {
        Ok(()) => {}
        // a failed physical commit already ended the transaction
        Err(DbError::TransactionFinished { .. }) => {
            debug!(transaction_id = %tx.id(), level = tx.level(), "Transaction already finished");
        }
        Err(err) => {
            warn!(
                transaction_id = %tx.id(),
                level = tx.level(),
                error = %err,
                "Rollback failed"
            );
        }
    }
}

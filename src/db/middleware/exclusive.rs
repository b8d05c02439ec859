use super::forward_scope;
use crate::db::adapter::{LockAcquire, LockRelease};
use crate::db::context::Context;
use crate::db::database::Database;
use crate::db::fanout::first_error;
use crate::db::scope::{LogicalDatabase, Scope};
use crate::db::transaction::Transaction;
use crate::error::{DbError, DbResult};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// A logical database held under a cluster-wide advisory lock.
///
/// The lock lives in a transaction on the master for as long as the wrapper is open.
/// Statements issued through the wrapper run normally; only `close` is different.
///
/// Dropping the wrapper without closing it releases the lock and ends the holding
/// transaction on a background task. Closing the wrapped database waits for that task.
pub struct ExclusiveDatabase {
    inner: Arc<dyn LogicalDatabase>,
    holder: Arc<Transaction>,
    name: String,
    closed: AtomicBool,
}

impl ExclusiveDatabase {
    /// Take the lock `name`, waiting at most `timeout` for the current holder.
    ///
    /// On failure the holding transaction is rolled back; `inner` stays open.
    pub async fn acquire(
        inner: Arc<dyn LogicalDatabase>,
        ctx: &Context,
        name: &str,
        timeout: Duration,
    ) -> DbResult<Self> {
        let holder = inner.database().master().begin(ctx).await?;
        let outcome = inner
            .adapter()
            .acquire_lock(ctx, &holder, name, timeout)
            .await;

        let err = match outcome {
            Ok(LockAcquire::Acquired) => {
                info!(
                    cluster_id = %inner.cluster_id(),
                    lock = %name,
                    transaction_id = %holder.id(),
                    "Exclusive lock acquired"
                );
                return Ok(Self {
                    inner,
                    holder: Arc::new(holder),
                    name: name.to_string(),
                    closed: AtomicBool::new(false),
                });
            }
            Ok(LockAcquire::TimedOut) => DbError::lock_timeout(name, timeout),
            Err(e) => e,
        };

        if let Err(e) = holder.rollback().await {
            warn!(lock = %name, error = %e, "Rollback after failed lock acquisition failed");
        }
        Err(err)
    }

    pub fn lock_name(&self) -> &str {
        &self.name
    }

    /// The transaction holding the lock.
    pub fn holder(&self) -> &Transaction {
        &self.holder
    }

    /// Release the lock, end the holding transaction, then close the wrapped database.
    ///
    /// Every step runs even when an earlier one fails; the first error is returned.
    async fn shutdown(&self) -> DbResult<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let [released, rolled_back] = end_hold(&*self.inner, &self.holder, &self.name).await;
        let closed = self.inner.close().await;
        if let Err(e) = &closed {
            warn!(lock = %self.name, error = %e, "Exclusive database close step failed");
        }
        first_error([released, rolled_back, closed])
    }
}

impl Drop for ExclusiveDatabase {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let holder = Arc::clone(&self.holder);
        let name = std::mem::take(&mut self.name);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let owner = inner.database().clone();
                let task = handle.spawn(async move {
                    debug!(lock = %name, "Exclusive database dropped without close");
                    end_hold(&*inner, &holder, &name).await;
                });
                owner.track_cleanup(task);
            }
            Err(_) => {
                warn!(
                    lock = %name,
                    transaction_id = %holder.id(),
                    "No runtime to release a dropped exclusive lock"
                );
            }
        }
    }
}

async fn release(inner: &dyn LogicalDatabase, holder: &Transaction, name: &str) -> DbResult<()> {
    let ctx = Context::new();
    match inner.adapter().release_lock(&ctx, holder, name).await? {
        LockRelease::Released => {
            info!(
                cluster_id = %inner.cluster_id(),
                lock = %name,
                "Exclusive lock released"
            );
            Ok(())
        }
        LockRelease::NotHeld => Err(DbError::lock_not_held(name)),
        LockRelease::Unknown => Err(DbError::lock_unknown(name)),
    }
}

/// Release the lock, then roll back the holder. Both steps always run.
async fn end_hold(
    inner: &dyn LogicalDatabase,
    holder: &Transaction,
    name: &str,
) -> [DbResult<()>; 2] {
    let released = release(inner, holder, name).await;
    let rolled_back = holder.rollback().await;
    for result in [&released, &rolled_back] {
        if let Err(e) = result {
            warn!(lock = %name, error = %e, "Exclusive database close step failed");
        }
    }
    [released, rolled_back]
}

forward_scope!(ExclusiveDatabase);

impl LogicalDatabase for ExclusiveDatabase {
    fn database(&self) -> &Database {
        self.inner.database()
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>> {
        Box::pin(self.shutdown())
    }

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope> {
        self
    }
}

use super::forward_scope;
use crate::db::context::Context;
use crate::db::database::Database;
use crate::db::metrics::Auditor;
use crate::db::scope::{LogicalDatabase, Scope};
use crate::error::DbResult;
use futures_util::future::{BoxFuture, join_all};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Pings every node on an interval and hands metrics snapshots to an optional auditor.
///
/// The background task only holds a weak reference, so it exits on its own once the wrapped
/// database is dropped. `close` stops it before the pools close.
pub struct HeartbeatDatabase {
    inner: Arc<dyn LogicalDatabase>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl HeartbeatDatabase {
    /// Spawn the heartbeat task on the current runtime.
    pub fn start(
        inner: Arc<dyn LogicalDatabase>,
        interval: Duration,
        auditor: Option<Arc<dyn Auditor>>,
    ) -> Self {
        // tokio::time::interval panics on zero
        let interval = interval.max(Duration::from_millis(1));
        let weak = Arc::downgrade(&inner);
        let handle = tokio::spawn(heartbeat_task(weak, interval, auditor));
        info!(
            cluster_id = %inner.cluster_id(),
            interval_ms = millis(interval),
            "Heartbeat started"
        );

        Self {
            inner,
            task: Mutex::new(Some(handle)),
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn stop(&self) {
        let handle = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            handle.abort();
            debug!(cluster_id = %self.inner.cluster_id(), "Heartbeat stopped");
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

async fn heartbeat_task(
    db: Weak<dyn LogicalDatabase>,
    interval: Duration,
    auditor: Option<Arc<dyn Auditor>>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // the first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;

        let Some(db) = db.upgrade() else {
            debug!("Logical database dropped, heartbeat exiting");
            return;
        };
        let base = db.database();
        if base.is_closed() {
            debug!(cluster_id = %base.cluster_id(), "Logical database closed, heartbeat exiting");
            return;
        }

        beat(base, interval).await;
        if let Some(auditor) = &auditor {
            auditor.audit(base.cluster_id(), &base.metrics().snapshot());
        }
    }
}

/// Ping each node, bounded by one interval, and log the nodes that fail.
async fn beat(db: &Database, interval: Duration) {
    let ctx = Context::new().with_timeout(interval);
    let results = join_all(
        db.nodes()
            .iter()
            .map(|pool| ctx.run("heartbeat", pool.ping())),
    )
    .await;

    for (node, result) in results.into_iter().enumerate() {
        if let Err(e) = result {
            warn!(cluster_id = %db.cluster_id(), node, error = %e, "Heartbeat ping failed");
        }
    }
}

impl Drop for HeartbeatDatabase {
    fn drop(&mut self) {
        self.stop();
    }
}

forward_scope!(HeartbeatDatabase);

impl LogicalDatabase for HeartbeatDatabase {
    fn database(&self) -> &Database {
        self.inner.database()
    }

    fn close(&self) -> BoxFuture<'_, DbResult<()>> {
        self.stop();
        self.inner.close()
    }

    fn into_scope(self: Arc<Self>) -> Arc<dyn Scope> {
        self
    }
}

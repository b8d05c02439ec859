use super::{ExclusiveDatabase, HeartbeatDatabase, ProfiledDatabase};
use crate::config::PoolOptions;
use crate::db::adapter::AdapterRegistry;
use crate::db::context::Context;
use crate::db::database::Database;
use crate::db::metrics::Auditor;
use crate::db::scope::LogicalDatabase;
use crate::error::DbResult;
use crate::models::Cluster;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

#[derive(Debug, Clone)]
struct ExclusiveLock {
    name: String,
    timeout: Duration,
}

/// Opens a logical database and wraps it in the configured decorators.
///
/// Decorators are applied innermost first: heartbeat, then profiling, then the exclusive
/// lock, so closing the result releases the lock before the heartbeat stops and the pools
/// close.
#[derive(Clone, Default)]
pub struct Activator {
    pool: PoolOptions,
    profile: bool,
    slow_threshold: Option<Duration>,
    heartbeat: Option<Duration>,
    auditor: Option<Arc<dyn Auditor>>,
    exclusive: Option<ExclusiveLock>,
}

impl Activator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pool limits applied to every node.
    pub fn pool(mut self, options: PoolOptions) -> Self {
        self.pool = options;
        self
    }

    /// Profile statements, warning about those slower than `slow_threshold`.
    pub fn profile(mut self, slow_threshold: Option<Duration>) -> Self {
        self.profile = true;
        self.slow_threshold = slow_threshold;
        self
    }

    /// Ping every node each `interval`. A zero interval disables the heartbeat.
    pub fn heartbeat(mut self, interval: Duration) -> Self {
        self.heartbeat = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Receives a metrics snapshot on every heartbeat.
    pub fn auditor(mut self, auditor: Arc<dyn Auditor>) -> Self {
        self.auditor = Some(auditor);
        self
    }

    /// Hold the advisory lock `name` for the lifetime of the database.
    pub fn exclusive(mut self, name: impl Into<String>, timeout: Duration) -> Self {
        self.exclusive = Some(ExclusiveLock {
            name: name.into(),
            timeout,
        });
        self
    }

    pub fn pool_options(&self) -> &PoolOptions {
        &self.pool
    }

    pub async fn activate(
        &self,
        registry: &AdapterRegistry,
        cluster: &Cluster,
    ) -> DbResult<Arc<dyn LogicalDatabase>> {
        let mut db: Arc<dyn LogicalDatabase> =
            Arc::new(Database::open(registry, cluster, &self.pool).await?);

        if let Some(interval) = self.heartbeat {
            db = Arc::new(HeartbeatDatabase::start(db, interval, self.auditor.clone()));
        } else if self.auditor.is_some() {
            warn!(cluster_id = %cluster.id(), "Auditor configured without a heartbeat; it will never run");
        }

        if self.profile {
            db = Arc::new(ProfiledDatabase::new(db, self.slow_threshold));
        }

        if let Some(lock) = &self.exclusive {
            let ctx = Context::new();
            match ExclusiveDatabase::acquire(Arc::clone(&db), &ctx, &lock.name, lock.timeout).await
            {
                Ok(exclusive) => db = Arc::new(exclusive),
                Err(e) => {
                    if let Err(close_err) = db.close().await {
                        warn!(error = %close_err, "Failed to close database after lock failure");
                    }
                    return Err(e);
                }
            }
        }

        Ok(db)
    }
}

impl std::fmt::Debug for Activator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Activator")
            .field("pool", &self.pool)
            .field("profile", &self.profile)
            .field("slow_threshold", &self.slow_threshold)
            .field("heartbeat", &self.heartbeat)
            .field("auditor", &self.auditor.is_some())
            .field("exclusive", &self.exclusive)
            .finish()
    }
}

/// Open `cluster`, decorated by `activator` when one is given.
pub async fn open(
    registry: &AdapterRegistry,
    cluster: &Cluster,
    activator: Option<&Activator>,
) -> DbResult<Arc<dyn LogicalDatabase>> {
    match activator {
        Some(activator) => activator.activate(registry, cluster).await,
        None => Ok(Arc::new(
            Database::open(registry, cluster, &PoolOptions::default()).await?,
        )),
    }
}

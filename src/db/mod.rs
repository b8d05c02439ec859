//! Database abstraction layer.
//!
//! This module provides:
//! - Physical connection pools per engine
//! - The logical database (master plus read replicas) and its routing
//! - Transactions with savepoint nesting and context-scoped propagation
//! - The deadlock-retry repository
//! - Dialect adapters and advisory locks
//! - Decorators: profiling, heartbeat and exclusive access

#[macro_use]
pub mod macros;
pub mod adapter;
pub mod context;
pub mod database;
pub mod fanout;
pub mod metrics;
pub mod middleware;
pub mod params;
pub mod pool;
pub mod repository;
pub mod scope;
pub mod statement;
pub mod transaction;
pub mod types;

pub use adapter::{Adapter, AdapterRegistry, LockAcquire, LockRelease};
pub use context::Context;
pub use database::{Database, PoolStatus};
pub use metrics::{Auditor, Metrics, MetricsSnapshot};
pub use middleware::{Activator, ExclusiveDatabase, HeartbeatDatabase, ProfiledDatabase, open};
pub use pool::DbPool;
pub use repository::{MAX_TRANSACTION_ATTEMPTS, Repository};
pub use scope::{LogicalDatabase, Scope, Tx};
pub use statement::Statement;
pub use transaction::Transaction;

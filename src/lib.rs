//! db-cluster library
//!
//! A logical SQL database over one master and zero or more read replicas (MySQL,
//! PostgreSQL or SQLite): writes go to the master, reads rotate over the replicas,
//! transactions nest through savepoints and propagate through a request [`Context`],
//! and a [`Repository`] retries units of work that hit a deadlock.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{Config, PoolOptions};
pub use db::{
    Activator, AdapterRegistry, Context, Database, LogicalDatabase, Repository, Scope, Tx, open,
};
pub use error::{DbError, DbResult};
pub use models::{Cluster, ClusterId, DataSource, DatabaseType, ExecResult, Param, Record};

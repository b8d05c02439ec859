//! Data models shared by the logical database layer.

pub mod connection;
pub mod query;

pub use connection::{Cluster, ClusterId, DataSource, DatabaseType};
pub use query::{ExecResult, Param, Record};

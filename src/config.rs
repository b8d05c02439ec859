//! Configuration handling for the db-cluster CLI and library.
//!
//! Pool limits are plain serde data shared by the library; the CLI layer parses node URLs,
//! pool flags and decorator switches from arguments and environment variables.

use crate::error::DbResult;
use crate::models::{Cluster, ClusterId, Param};
use clap::{Parser, Subcommand};
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SLOW_QUERY_MS: u64 = 500;
pub const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;

// Pool configuration defaults
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
/// A transaction holding a connection and a lock probe on the master need two at once.
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 5;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_MAX_LIFETIME_SECS: u64 = 1800;

/// Connection pool limits, applied uniformly to every node of a cluster at open time.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections per node (default: 10 for MySQL/PostgreSQL, 5 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections per node (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
    /// Maximum connection lifetime in seconds (default: 1800)
    pub max_lifetime_secs: Option<u64>,
    /// Whether to test connections before use (default: true)
    pub test_before_acquire: Option<bool>,
}

impl PoolOptions {
    /// Get max_connections with default value based on database type.
    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    pub fn max_lifetime_or_default(&self) -> u64 {
        self.max_lifetime_secs.unwrap_or(DEFAULT_MAX_LIFETIME_SECS)
    }

    pub fn test_before_acquire_or_default(&self) -> bool {
        self.test_before_acquire.unwrap_or(true)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        if self.acquire_timeout_secs == Some(0) {
            return Err("acquire_timeout must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Command-line configuration for the db-cluster binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "db-cluster",
    about = "Run statements against a SQL master and its read replicas",
    version,
    author
)]
pub struct Config {
    /// Node connection URLs. The first node is the master, the rest are read replicas.
    /// Can be specified multiple times or as comma-separated values.
    #[arg(
        short = 'n',
        long = "node",
        value_name = "URL",
        env = "DB_CLUSTER_NODES",
        value_delimiter = ',',
        required = true
    )]
    pub nodes: Vec<String>,

    /// Adapter name (defaults to the scheme of the first node)
    #[arg(long, env = "DB_CLUSTER_DRIVER")]
    pub driver: Option<String>,

    /// Cluster identifier used for context-scoped transaction lookup
    #[arg(long, default_value_t = 1, env = "DB_CLUSTER_ID")]
    pub cluster_id: u32,

    /// Maximum connections per node
    #[arg(long, env = "DB_CLUSTER_MAX_CONNECTIONS")]
    pub max_connections: Option<u32>,

    /// Minimum connections per node
    #[arg(long, env = "DB_CLUSTER_MIN_CONNECTIONS")]
    pub min_connections: Option<u32>,

    /// Connection acquire timeout in seconds
    #[arg(long, env = "DB_CLUSTER_ACQUIRE_TIMEOUT")]
    pub acquire_timeout: Option<u64>,

    /// Idle connection timeout in seconds
    #[arg(long, env = "DB_CLUSTER_IDLE_TIMEOUT")]
    pub idle_timeout: Option<u64>,

    /// Maximum connection lifetime in seconds
    #[arg(long, env = "DB_CLUSTER_MAX_LIFETIME")]
    pub max_lifetime: Option<u64>,

    /// Deadline for the whole command in seconds
    #[arg(
        long,
        default_value_t = DEFAULT_QUERY_TIMEOUT_SECS,
        env = "DB_CLUSTER_QUERY_TIMEOUT"
    )]
    pub query_timeout: u64,

    /// Ping every node at this interval (seconds) while the command runs
    #[arg(long, value_name = "SECS", env = "DB_CLUSTER_HEARTBEAT")]
    pub heartbeat: Option<u64>,

    /// Log every statement with its duration
    #[arg(long, env = "DB_CLUSTER_PROFILE")]
    pub profile: bool,

    /// Statements slower than this are logged as warnings when profiling
    #[arg(
        long,
        default_value_t = DEFAULT_SLOW_QUERY_MS,
        env = "DB_CLUSTER_SLOW_QUERY_MS"
    )]
    pub slow_query_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "DB_CLUSTER_LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "DB_CLUSTER_JSON_LOGS")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Ping every node of the cluster
    Ping,
    /// Execute a statement on the master
    Exec {
        sql: String,
        /// Positional parameters; null, true/false and numbers are recognized
        #[arg(short, long = "param", value_name = "VALUE")]
        params: Vec<String>,
    },
    /// Run a query on a read replica
    Query {
        sql: String,
        #[arg(short, long = "param", value_name = "VALUE")]
        params: Vec<String>,
    },
    /// Hold a named advisory lock on the master
    Lock {
        name: String,
        /// Seconds to wait for the lock
        #[arg(long, default_value_t = DEFAULT_LOCK_TIMEOUT_SECS)]
        timeout: u64,
        /// Seconds to hold the lock before releasing it
        #[arg(long, default_value_t = 0)]
        hold: u64,
    },
    /// Ping every node and print the metrics and pool status
    Stats,
}

impl Command {
    /// Statement parameters parsed from the command line.
    pub fn params(&self) -> Vec<Param> {
        match self {
            Self::Exec { params, .. } | Self::Query { params, .. } => {
                params.iter().map(|p| Param::parse_literal(p)).collect()
            }
            _ => Vec::new(),
        }
    }
}

impl Config {
    /// Parse configuration from command line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Pool limits from the CLI flags.
    pub fn pool_options(&self) -> Result<PoolOptions, String> {
        let options = PoolOptions {
            max_connections: self.max_connections,
            min_connections: self.min_connections,
            idle_timeout_secs: self.idle_timeout,
            acquire_timeout_secs: self.acquire_timeout,
            max_lifetime_secs: self.max_lifetime,
            test_before_acquire: None,
        };
        options.validate()?;
        Ok(options)
    }

    /// Cluster descriptor built from the node URLs.
    pub fn cluster(&self) -> DbResult<Cluster> {
        let cluster = Cluster::from_urls(ClusterId(self.cluster_id), &self.nodes)?;
        match &self.driver {
            Some(driver) => Cluster::new(cluster.id(), driver.clone(), cluster.nodes().to_vec()),
            None => Ok(cluster),
        }
    }

    pub fn query_timeout_duration(&self) -> Duration {
        Duration::from_secs(self.query_timeout)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    pub fn slow_query_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_query_ms)
    }
}

//! Error types for the logical database layer.
//!
//! This module defines all error types using `thiserror` for ergonomic error handling.
//! Driver errors keep their engine error code so dialect adapters can classify them
//! (deadlocks, lock timeouts) without guessing from message text.

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, suggestion: String },

    #[error("Database error: {message}")]
    Database {
        message: String,
        /// Engine error code, e.g. "40P01" for a PostgreSQL deadlock or "5" for SQLITE_BUSY
        sql_state: Option<String>,
        suggestion: String,
    },

    #[error("Unknown driver '{driver}': no adapter registered under this name")]
    UnknownDriver { driver: String },

    #[error("Transaction already finished (transaction: {transaction_id}, level: {level})")]
    TransactionFinished { transaction_id: String, level: usize },

    #[error("Timeout: {operation} timed out")]
    Timeout { operation: String },

    #[error("Deadline exceeded during {operation}")]
    DeadlineExceeded { operation: String },

    #[error("Failed to capture lock '{name}' within {timeout:?}")]
    LockTimeout { name: String, timeout: Duration },

    #[error("Failed to release lock '{name}': held by another session or already released")]
    LockNotHeld { name: String },

    #[error("Failed to release lock '{name}': lock does not exist")]
    LockUnknown { name: String },

    #[error("Database is closed (cluster: {cluster_id})")]
    Closed { cluster_id: u32 },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a connection error with a helpful suggestion.
    pub fn connection(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Create a database error with optional SQL state.
    pub fn database(
        message: impl Into<String>,
        sql_state: Option<String>,
        suggestion: impl Into<String>,
    ) -> Self {
        Self::Database {
            message: message.into(),
            sql_state,
            suggestion: suggestion.into(),
        }
    }

    pub fn unknown_driver(driver: impl Into<String>) -> Self {
        Self::UnknownDriver {
            driver: driver.into(),
        }
    }

    pub fn transaction_finished(transaction_id: impl Into<String>, level: usize) -> Self {
        Self::TransactionFinished {
            transaction_id: transaction_id.into(),
            level,
        }
    }

    /// Create a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn deadline_exceeded(operation: impl Into<String>) -> Self {
        Self::DeadlineExceeded {
            operation: operation.into(),
        }
    }

    pub fn lock_timeout(name: impl Into<String>, timeout: Duration) -> Self {
        Self::LockTimeout {
            name: name.into(),
            timeout,
        }
    }

    pub fn lock_not_held(name: impl Into<String>) -> Self {
        Self::LockNotHeld { name: name.into() }
    }

    pub fn lock_unknown(name: impl Into<String>) -> Self {
        Self::LockUnknown { name: name.into() }
    }

    pub fn closed(cluster_id: u32) -> Self {
        Self::Closed { cluster_id }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Connection { suggestion, .. } => Some(suggestion),
            Self::Database { suggestion, .. } => Some(suggestion),
            _ => None,
        }
    }

    /// Engine error code carried by a database error.
    pub fn sql_state(&self) -> Option<&str> {
        match self {
            Self::Database { sql_state, .. } => sql_state.as_deref(),
            _ => None,
        }
    }

    /// Message reported by the database engine, if this is a database error.
    pub fn database_message(&self) -> Option<&str> {
        match self {
            Self::Database { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Check if this is one of the advisory lock errors.
    pub fn is_lock_error(&self) -> bool {
        matches!(
            self,
            Self::LockTimeout { .. } | Self::LockNotHeld { .. } | Self::LockUnknown { .. }
        )
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Configuration(msg) => DbError::connection(
                msg.to_string(),
                "Check the connection string format and credentials",
            ),
            sqlx::Error::Database(db_err) => {
                let code = db_err.code().map(|c| c.to_string());
                DbError::database(
                    db_err.message(),
                    code,
                    "Check the SQL syntax and referenced objects",
                )
            }
            sqlx::Error::RowNotFound => DbError::database(
                "No rows returned",
                None,
                "Verify the query conditions match existing data",
            ),
            sqlx::Error::PoolTimedOut => DbError::timeout("connection pool acquire"),
            sqlx::Error::PoolClosed => {
                DbError::connection("Connection pool is closed", "Reopen the database")
            }
            sqlx::Error::Io(io_err) => DbError::connection(
                format!("I/O error: {}", io_err),
                "Check network connectivity and database server status",
            ),
            sqlx::Error::Tls(tls_err) => DbError::connection(
                format!("TLS error: {}", tls_err),
                "Verify TLS configuration and certificates",
            ),
            sqlx::Error::Protocol(msg) => DbError::connection(
                format!("Protocol error: {}", msg),
                "Check database server compatibility",
            ),
            sqlx::Error::ColumnIndexOutOfBounds { index, len } => DbError::internal(format!(
                "Column index {} out of bounds (len: {})",
                index, len
            )),
            sqlx::Error::ColumnDecode { index, source } => {
                DbError::internal(format!("Failed to decode column {}: {}", index, source))
            }
            sqlx::Error::Decode(source) => DbError::internal(format!("Decode error: {}", source)),
            sqlx::Error::WorkerCrashed => DbError::internal("Database worker crashed"),
            _ => DbError::internal(format!("Unknown database error: {}", err)),
        }
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;

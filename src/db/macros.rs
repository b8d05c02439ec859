//! Engine dispatch macros.
//!
//! The pool and transaction enums wrap one sqlx type per engine. Most operations are
//! written once against sqlx's generic API, so these macros expand a single body into
//! the three match arms instead of repeating it per engine.

/// Expand the same body for every engine variant of an enum.
///
/// # Example
///
/// ```ignore
/// dispatch!(self, DbPool, pool => pool.close().await)
/// ```
#[macro_export]
macro_rules! dispatch {
    ($value:expr, $enum:ident, $inner:ident => $body:expr) => {
        match $value {
            $enum::MySql($inner) => $body,
            $enum::Postgres($inner) => $body,
            $enum::SQLite($inner) => $body,
        }
    };
}

pub use dispatch;

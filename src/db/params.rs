//! Parameter binding for parameterized statements.
//!
//! One generic binder serves all three engines: every `Param` variant maps to a Rust
//! type that each sqlx driver can encode.

use crate::models::Param;
use sqlx::query::Query;
use sqlx::{Database as SqlxDatabase, Encode, Type};

/// Build a query for `sql` with `params` bound in order.
pub(crate) fn bind_params<'q, DB>(
    sql: &'q str,
    params: &'q [Param],
) -> Query<'q, DB, <DB as SqlxDatabase>::Arguments<'q>>
where
    DB: SqlxDatabase,
    bool: Encode<'q, DB> + Type<DB>,
    i64: Encode<'q, DB> + Type<DB>,
    f64: Encode<'q, DB> + Type<DB>,
    &'q str: Encode<'q, DB> + Type<DB>,
    &'q [u8]: Encode<'q, DB> + Type<DB>,
    Option<String>: Encode<'q, DB> + Type<DB>,
{
    params
        .iter()
        .fold(sqlx::query::<DB>(sql), |query, param| match param {
            Param::Null => query.bind(None::<String>),
            Param::Bool(v) => query.bind(*v),
            Param::Int(v) => query.bind(*v),
            Param::Float(v) => query.bind(*v),
            Param::Text(v) => query.bind(v.as_str()),
            Param::Bytes(v) => query.bind(v.as_slice()),
        })
}

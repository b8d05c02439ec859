//! Decorators over a logical database and the activator that chains them.
//!
//! Each decorator wraps an `Arc<dyn LogicalDatabase>` and forwards what it does not change.
//! `database()` always reaches the base [`Database`](crate::db::Database), so pings, prepared
//! statements and views bypass the decorators.

/// Implement [`Scope`](crate::db::Scope) for a decorator by forwarding every call to its
/// `inner` field.
macro_rules! forward_scope {
    ($decorator:ty) => {
        impl $crate::db::scope::Scope for $decorator {
            fn cluster_id(&self) -> $crate::models::ClusterId {
                $crate::db::scope::Scope::cluster_id(&*self.inner)
            }

            fn exec<'a>(
                &'a self,
                ctx: &'a $crate::db::context::Context,
                sql: &'a str,
                params: &'a [$crate::models::Param],
            ) -> ::futures_util::future::BoxFuture<
                'a,
                $crate::error::DbResult<$crate::models::ExecResult>,
            > {
                $crate::db::scope::Scope::exec(&*self.inner, ctx, sql, params)
            }

            fn query<'a>(
                &'a self,
                ctx: &'a $crate::db::context::Context,
                sql: &'a str,
                params: &'a [$crate::models::Param],
            ) -> ::futures_util::future::BoxFuture<
                'a,
                $crate::error::DbResult<Vec<$crate::models::Record>>,
            > {
                $crate::db::scope::Scope::query(&*self.inner, ctx, sql, params)
            }

            fn query_row<'a>(
                &'a self,
                ctx: &'a $crate::db::context::Context,
                sql: &'a str,
                params: &'a [$crate::models::Param],
            ) -> ::futures_util::future::BoxFuture<
                'a,
                $crate::error::DbResult<Option<$crate::models::Record>>,
            > {
                $crate::db::scope::Scope::query_row(&*self.inner, ctx, sql, params)
            }

            fn begin<'a>(
                &'a self,
                ctx: &'a $crate::db::context::Context,
            ) -> ::futures_util::future::BoxFuture<
                'a,
                $crate::error::DbResult<::std::sync::Arc<dyn $crate::db::scope::Tx>>,
            > {
                $crate::db::scope::Scope::begin(&*self.inner, ctx)
            }
        }
    };
}

pub(crate) use forward_scope;

mod exclusive;
mod heartbeat;
mod open;
mod profile;

pub use exclusive::ExclusiveDatabase;
pub use heartbeat::HeartbeatDatabase;
pub use open::{Activator, open};
pub use profile::{ProfiledDatabase, ProfiledTx, Profiler};

//! Scatter/gather over the nodes of a cluster.

use crate::error::DbResult;
use futures_util::future::join_all;
use std::future::Future;

/// Run `op` against every item concurrently and wait for all of them.
///
/// Returns the first error in item order; later errors are dropped.
pub async fn scatter<'a, T, F, Fut>(items: &'a [T], mut op: F) -> DbResult<()>
where
    F: FnMut(usize, &'a T) -> Fut,
    Fut: Future<Output = DbResult<()>>,
{
    let results = join_all(items.iter().enumerate().map(|(idx, item)| op(idx, item))).await;
    first_error(results)
}

pub fn first_error<I>(results: I) -> DbResult<()>
where
    I: IntoIterator<Item = DbResult<()>>,
{
    results.into_iter().find(Result::is_err).unwrap_or(Ok(()))
}

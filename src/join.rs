//! Join combinators for the dual-wait and dual-release patterns.
//!
//! The readiness wait needs a two-of-two join with eager abort: the first
//! failed watcher wins and the sibling must stop polling. Teardown needs the
//! opposite: every release must be driven to completion and every failure
//! reported. Both call sites share these two combinators instead of
//! duplicating the cancellation plumbing.

use futures::future::LocalBoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};

/// N-of-N join with eager abort.
///
/// Resolves `Ok` only once every task has succeeded. The first `Err` is
/// returned immediately; the remaining tasks are dropped at that point, which
/// cancels them mid-poll. Completion order of the successes is not preserved.
pub async fn try_join_eager<T, E>(tasks: Vec<LocalBoxFuture<'_, Result<T, E>>>) -> Result<Vec<T>, E> {
    let mut pending: FuturesUnordered<_> = tasks.into_iter().collect();
    let mut ready = Vec::with_capacity(pending.len());

    while let Some(result) = pending.next().await {
        match result {
            Ok(value) => ready.push(value),
            // Dropping `pending` cancels every sibling still in flight.
            Err(e) => return Err(e),
        }
    }

    Ok(ready)
}

/// Aggregate join: drive every task to completion and return all results in
/// input order, errors included. No task is abandoned because a sibling
/// failed.
pub async fn join_collect<T, E>(tasks: Vec<LocalBoxFuture<'_, Result<T, E>>>) -> Vec<Result<T, E>> {
    futures::future::join_all(tasks).await
}

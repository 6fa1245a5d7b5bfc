//! Scheduling policies.
//!
//! The request side fans out to every router not yet completed (or the
//! first one in sequential mode); the response side only ever advances one
//! router per completion event.

use super::{status::RouterStatus, RouterSpec};

/// Index of the first router the scheduler may dispatch
pub fn next_schedulable(routers: &[RouterSpec]) -> Option<usize> {
    routers.iter().position(|r| r.status.is_schedulable())
}

/// Indexes of the routers to dispatch when a request arrives.
///
/// Only completed routers are skipped. Callers reset the rest to pending
/// first (see `Aggregate::restart`).
pub fn initial_dispatch(routers: &[RouterSpec], sequential: bool) -> Vec<usize> {
    let remaining = routers
        .iter()
        .enumerate()
        .filter(|(_, r)| r.status != RouterStatus::Completed)
        .map(|(idx, _)| idx);

    if sequential {
        remaining.take(1).collect()
    } else {
        remaining.collect()
    }
}

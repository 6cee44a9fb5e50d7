//! Delivery invariants checked after a test run.
//!
//! Each check compares what was enqueued on a lane with what the collector
//! accepted, and fails with a description of the first violation.

use std::collections::HashSet;

use anyhow::{bail, Result};
use uuid::Uuid;

/// Every delivered id appears at most once.
///
/// # Errors
///
/// Names the first id delivered twice.
pub fn check_no_duplicates(delivered: &[Uuid]) -> Result<()> {
    let mut seen = HashSet::with_capacity(delivered.len());
    for id in delivered {
        if !seen.insert(id) {
            bail!("payload {id} was delivered more than once");
        }
    }
    Ok(())
}

/// Delivered ids follow the enqueue order of the lane.
///
/// `delivered` may be a prefix-closed subset when some jobs are still
/// pending or were dropped, but no job may overtake one enqueued earlier.
///
/// # Errors
///
/// Names the pair delivered out of order, or an id that was never enqueued.
pub fn check_fifo(enqueued: &[Uuid], delivered: &[Uuid]) -> Result<()> {
    let mut last_position: Option<usize> = None;
    for id in delivered {
        let Some(position) = enqueued.iter().position(|candidate| candidate == id) else {
            bail!("payload {id} was delivered but never enqueued");
        };
        if let Some(previous) = last_position {
            if position < previous {
                bail!("payload {id} overtook {}", enqueued[previous]);
            }
        }
        last_position = Some(position);
    }
    Ok(())
}

/// Every enqueued id is accounted for exactly once, either in `delivered`
/// or in `remaining`.
///
/// # Errors
///
/// Names the first lost or double-counted id.
pub fn check_no_loss(enqueued: &[Uuid], delivered: &[Uuid], remaining: &[Uuid]) -> Result<()> {
    check_no_duplicates(delivered)?;
    for id in enqueued {
        let count = delivered.iter().chain(remaining).filter(|other| *other == id).count();
        match count {
            0 => bail!("payload {id} was lost"),
            1 => {},
            _ => bail!("payload {id} is both delivered and still pending"),
        }
    }
    Ok(())
}

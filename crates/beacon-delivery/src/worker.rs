//! Lane worker driving one delivery lane.
//!
//! Each worker loops over dispatch attempts for its lane, sleeping between
//! cycles for the active or idle interval. Enqueues and restored
//! connectivity wake the worker early.

use beacon_core::JobKind;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    error::Result,
    queue::{DeliveryQueue, DispatchOutcome},
    retry::IntervalPolicy,
};

/// Worker that dispatches one lane until cancelled.
pub(crate) struct LaneWorker {
    kind: JobKind,
    queue: DeliveryQueue,
    intervals: IntervalPolicy,
    cancellation_token: CancellationToken,
}

impl LaneWorker {
    pub(crate) fn new(
        kind: JobKind,
        queue: DeliveryQueue,
        intervals: IntervalPolicy,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self { kind, queue, intervals, cancellation_token }
    }

    /// Runs the dispatch loop until cancellation.
    ///
    /// A cancelled worker never abandons an attempt midway; it stops between
    /// cycles.
    pub(crate) async fn run(&self) -> Result<()> {
        info!(lane = %self.kind, "lane worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(lane = %self.kind, "lane worker received shutdown signal");
                break;
            }

            let outcome = self.queue.dispatch_once(self.kind).await;
            self.queue.persist_if_dirty().await;

            let delay =
                self.intervals.interval(self.queue.is_online(), self.queue.pending(self.kind));
            match outcome {
                DispatchOutcome::Idle | DispatchOutcome::Offline => {
                    trace!(lane = %self.kind, ?outcome, delay_ms = delay_ms(delay), "lane idle");
                },
                _ => debug!(lane = %self.kind, ?outcome, delay_ms = delay_ms(delay), "lane cycle"),
            }

            tokio::select! {
                () = self.queue.clock().sleep(delay) => {}
                () = self.queue.lane_wake(self.kind).notified() => {}
                () = self.cancellation_token.cancelled() => break,
            }
        }

        info!(lane = %self.kind, "lane worker stopped");
        Ok(())
    }
}

fn delay_ms(delay: std::time::Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

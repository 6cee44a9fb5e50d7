//! Lane worker management with structured concurrency.
//!
//! Supervises one worker per delivery lane plus the task mirroring the
//! connectivity monitor into the queue, and shuts them down together.

use std::{fmt, time::Duration};

use beacon_core::JobKind;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    queue::DeliveryQueue,
    retry::IntervalPolicy,
    worker::LaneWorker,
};

/// Task supervised by the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Task {
    Lane(JobKind),
    Connectivity,
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Lane(kind) => write!(f, "{kind} lane"),
            Self::Connectivity => f.write_str("connectivity"),
        }
    }
}

/// Supervised set of tasks driving a running queue.
pub(crate) struct LanePool {
    queue: DeliveryQueue,
    intervals: IntervalPolicy,
    cancellation_token: CancellationToken,
    handles: Vec<(Task, JoinHandle<Result<()>>)>,
}

impl fmt::Debug for LanePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LanePool")
            .field("intervals", &self.intervals)
            .field("tasks", &self.handles.iter().map(|(task, _)| *task).collect::<Vec<_>>())
            .field("cancelled", &self.cancellation_token.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl LanePool {
    pub(crate) fn new(queue: DeliveryQueue, intervals: IntervalPolicy) -> Self {
        Self { queue, intervals, cancellation_token: CancellationToken::new(), handles: Vec::new() }
    }

    /// Spawns the lane workers and the connectivity subscription.
    ///
    /// Returns immediately; tasks run until cancelled.
    pub(crate) fn spawn_workers(&mut self) {
        info!(lanes = JobKind::ALL.len(), "spawning lane workers");

        let connectivity = tokio::spawn(follow_connectivity(
            self.queue.clone(),
            self.cancellation_token.clone(),
        ));
        self.handles.push((Task::Connectivity, connectivity));

        for kind in JobKind::ALL {
            let worker = LaneWorker::new(
                kind,
                self.queue.clone(),
                self.intervals,
                self.cancellation_token.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(lane = %kind, error = %error, "lane worker terminated with error");
                }

                result
            });

            self.handles.push((Task::Lane(kind), handle));
        }

        debug!(spawned_tasks = self.handles.len(), "lane workers spawned");
    }

    /// Signals every task to stop without waiting.
    pub(crate) fn cancel(&self) {
        self.cancellation_token.cancel();
    }

    /// Cancels every task and waits for them to finish their current cycle.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::ShutdownTimeout` if tasks outlive `timeout`,
    /// in which case they are aborted, or `DeliveryError::WorkerPanic` for
    /// the first lane worker that panicked.
    pub(crate) async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            task_count = self.handles.len(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "initiating graceful lane shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.handles);
        let aborts: Vec<_> = handles.iter().map(|(_, handle)| handle.abort_handle()).collect();

        let shutdown_future = async {
            let mut first_error = None;

            for (task, handle) in handles {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(task = %task, error = %error, "task failed during shutdown");
                    },
                    Err(join_error) => {
                        error!(task = %task, error = %join_error, "task panicked during shutdown");
                        let error = match task {
                            Task::Lane(lane) => {
                                DeliveryError::WorkerPanic { lane, error: join_error.to_string() }
                            },
                            Task::Connectivity => DeliveryError::internal(format!(
                                "connectivity task panicked: {join_error}"
                            )),
                        };
                        first_error.get_or_insert(error);
                    },
                }
            }

            first_error
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(None) => {
                info!("lane shutdown completed");
                Ok(())
            },
            Ok(Some(error)) => Err(error),
            Err(_timeout) => {
                error!("lane shutdown timed out, aborting remaining tasks");
                for abort in aborts {
                    abort.abort();
                }
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }
}

impl Drop for LanePool {
    fn drop(&mut self) {
        let active = self.handles.iter().filter(|(_, handle)| !handle.is_finished()).count();

        if active > 0 && !self.cancellation_token.is_cancelled() {
            self.cancellation_token.cancel();
            warn!(
                active_tasks = active,
                "lane pool dropped without graceful shutdown, cancelling tasks"
            );
        }
    }
}

/// Mirrors the connectivity monitor into the queue until cancelled.
async fn follow_connectivity(queue: DeliveryQueue, token: CancellationToken) -> Result<()> {
    let mut rx = queue.monitor().subscribe();
    let initial = *rx.borrow_and_update();
    queue.set_connectivity(initial);

    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    debug!("connectivity monitor closed, keeping last known state");
                    token.cancelled().await;
                    break;
                }
                let online = *rx.borrow_and_update();
                queue.set_connectivity(online);
            }
            () = token.cancelled() => break,
        }
    }

    Ok(())
}

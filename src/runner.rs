use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{OrchestratorError, Result};

/// A boxed unit of work handed to [`run`].
pub type TaskFuture<T> = BoxFuture<'static, Result<T>>;

/// Bounds and cancellation controls for one batch.
#[derive(Clone, Default)]
pub struct RunOptions {
    /// Maximum tasks in flight at once; unbounded when `None`.
    pub concurrency: Option<usize>,
    /// Per-task ceiling. Exceeding it fails only that task's slot.
    pub timeout: Option<Duration>,
    /// Shared ceiling for the entire batch. Exceeding it fails the call.
    pub deadline: Option<Duration>,
    /// External cancellation; triggering it fails the call and discards
    /// already-completed results.
    pub cancel: Option<CancellationToken>,
}

impl RunOptions {
    fn validate(&self) -> Result<()> {
        if self.concurrency == Some(0) {
            return Err(OrchestratorError::InvalidConfiguration(
                "concurrency must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

// The deadline arm of the select needs a live sleep even when no deadline
// was requested; a year is effectively never for an in-process batch.
const NO_DEADLINE: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Run a batch of tasks with bounded concurrency.
///
/// Results come back in input order regardless of completion order: each
/// task owns an index into a slot array, nothing is appended as tasks
/// finish. The outer `Result` fails only for whole-batch conditions
/// (`queue-deadline-exceeded`, `queue-aborted`); per-task failures,
/// including `queue-task-timeout`, land in that task's slot and leave the
/// rest of the batch untouched.
pub async fn run<T: Send + 'static>(
    tasks: Vec<TaskFuture<T>>,
    opts: &RunOptions,
) -> Result<Vec<Result<T>>> {
    opts.validate()?;

    let total = tasks.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let semaphore = opts.concurrency.map(|n| Arc::new(Semaphore::new(n)));
    let per_task_timeout = opts.timeout;

    let mut set: JoinSet<(usize, Result<T>)> = JoinSet::new();
    for (index, task) in tasks.into_iter().enumerate() {
        let semaphore = semaphore.clone();
        set.spawn(async move {
            let _permit = match semaphore {
                Some(semaphore) => match semaphore.acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => {
                        return (
                            index,
                            Err(OrchestratorError::internal("runner semaphore closed")),
                        )
                    }
                },
                None => None,
            };
            let outcome = match per_task_timeout {
                Some(limit) => match tokio::time::timeout(limit, task).await {
                    Ok(result) => result,
                    Err(_) => Err(OrchestratorError::QueueTaskTimeout {
                        index,
                        timeout: limit,
                    }),
                },
                None => task.await,
            };
            (index, outcome)
        });
    }

    let deadline = opts.deadline;
    let cancel = opts.cancel.clone().unwrap_or_default();
    let deadline_sleep = sleep(deadline.unwrap_or(NO_DEADLINE));
    tokio::pin!(deadline_sleep);

    let mut slots: Vec<Option<Result<T>>> = (0..total).map(|_| None).collect();
    let mut completed = 0usize;

    while completed < total {
        tokio::select! {
            _ = cancel.cancelled() => {
                set.abort_all();
                debug!(pending = total - completed, "batch aborted by cancellation signal");
                return Err(OrchestratorError::QueueAborted);
            }
            _ = &mut deadline_sleep, if deadline.is_some() => {
                set.abort_all();
                let limit = deadline.unwrap_or(NO_DEADLINE);
                debug!(deadline = ?limit, pending = total - completed, "batch deadline exceeded");
                return Err(OrchestratorError::QueueDeadlineExceeded {
                    deadline: limit,
                    pending: total - completed,
                });
            }
            joined = set.join_next() => {
                match joined {
                    Some(Ok((index, outcome))) => {
                        slots[index] = Some(outcome);
                        completed += 1;
                    }
                    Some(Err(join_error)) => {
                        // A panicked task leaves its slot empty; filled below.
                        warn!(error = %join_error, "batch task failed to join");
                        completed += 1;
                    }
                    None => break,
                }
            }
        }
    }

    Ok(slots
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(OrchestratorError::internal("batch task panicked")))
        })
        .collect())
}

//! Bounded-concurrency task runner.
//!
//! Tasks are spawned on the tokio runtime, at most `limit` at a time. The
//! driver loop is the only place that advances the dispatch cursor, so the
//! next task is always picked by exactly one writer.

use std::future::Future;

use futures_util::stream::{FuturesUnordered, StreamExt};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Default number of tasks in flight at once.
pub const DEFAULT_CONCURRENCY: usize = 4;

/// Why a bounded run stopped early.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError<E> {
    #[error("task {index} failed: {source}")]
    Failed {
        index: usize,
        #[source]
        source: E,
    },

    #[error("task {index} panicked")]
    Panicked { index: usize },

    #[error("run cancelled")]
    Cancelled,
}

impl<E> ScheduleError<E> {
    /// Index of the task that stopped the run, if a task did.
    pub fn index(&self) -> Option<usize> {
        match self {
            Self::Failed { index, .. } | Self::Panicked { index } => Some(*index),
            Self::Cancelled => None,
        }
    }
}

/// Runs `tasks` with at most `limit` in flight and returns their results in
/// input order.
///
/// A `limit` of zero means no bound. See [`run_bounded_with_cancel`].
pub async fn run_bounded<T, E, F, Fut>(
    tasks: Vec<F>,
    limit: usize,
) -> Result<Vec<T>, ScheduleError<E>>
where
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    run_bounded_with_cancel(tasks, limit, &CancellationToken::new()).await
}

/// Runs `tasks` with at most `limit` in flight, stopping when `cancel` fires.
///
/// Each task is called with its own index. The first failure ends the run
/// and nothing further is dispatched. Tasks already running are detached,
/// not aborted, and may still complete on the runtime.
pub async fn run_bounded_with_cancel<T, E, F, Fut>(
    tasks: Vec<F>,
    limit: usize,
    cancel: &CancellationToken,
) -> Result<Vec<T>, ScheduleError<E>>
where
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let total = tasks.len();
    if total == 0 {
        return Ok(Vec::new());
    }
    let limit = if limit == 0 { total } else { limit.min(total) };

    let mut cursor = tasks.into_iter().enumerate();
    let mut results: Vec<Option<T>> = (0..total).map(|_| None).collect();
    let mut running = FuturesUnordered::new();

    if cancel.is_cancelled() {
        return Err(ScheduleError::Cancelled);
    }
    for (index, task) in cursor.by_ref().take(limit) {
        running.push(dispatch(index, task));
    }
    debug!(total, limit, "bounded run started");

    loop {
        let settled = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(in_flight = running.len(), "bounded run cancelled");
                return Err(ScheduleError::Cancelled);
            }
            settled = running.next() => settled,
        };
        let Some((index, joined)) = settled else {
            break;
        };

        match joined {
            Ok(Ok(value)) => {
                results[index] = Some(value);
                if cancel.is_cancelled() {
                    return Err(ScheduleError::Cancelled);
                }
                if let Some((next, task)) = cursor.next() {
                    running.push(dispatch(next, task));
                }
            }
            Ok(Err(source)) => {
                debug!(index, in_flight = running.len(), "task failed, stopping run");
                return Err(ScheduleError::Failed { index, source });
            }
            Err(_) => return Err(ScheduleError::Panicked { index }),
        }
    }

    debug_assert!(results.iter().all(Option::is_some));
    Ok(results.into_iter().flatten().collect())
}

/// Spawns one task and tags its join result with the task index.
///
/// Dropping the returned future detaches the task.
fn dispatch<T, E, F, Fut>(
    index: usize,
    task: F,
) -> impl Future<Output = (usize, Result<Result<T, E>, JoinError>)>
where
    F: FnOnce(usize) -> Fut,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Send + 'static,
{
    let handle = tokio::spawn(task(index));
    async move { (index, handle.await) }
}

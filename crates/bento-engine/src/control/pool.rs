//! Bounded-concurrency worker pool
//!
//! Tasks are queued with their original index; `max_workers` workers pull
//! from the queue and report on separate result and error channels. The
//! collector places results by index, so `results[i]` always belongs to
//! `tasks[i]` regardless of completion order.
//!
//! Every call owns its channels and workers. Before `run` returns, the pool
//! token is cancelled, the receivers are dropped and every worker has been
//! joined, so nothing outlives the call.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::params::ErrorStrategy;

/// A task that failed under [`ErrorStrategy::CollectAll`]
#[derive(Debug)]
pub struct TaskFailure {
    pub index: usize,
    pub error: EngineError,
}

/// Results in input order plus any collected failures
#[derive(Debug)]
pub struct PoolOutcome<R> {
    /// `None` where the task at that index failed
    pub results: Vec<Option<R>>,
    pub errors: Vec<TaskFailure>,
}

impl<R> PoolOutcome<R> {
    fn empty() -> Self {
        Self {
            results: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether every task succeeded
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty() && self.results.iter().all(Option::is_some)
    }
}

/// Runs a task list under a bounded worker count
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    max_workers: usize,
    strategy: ErrorStrategy,
}

impl WorkerPool {
    /// `max_workers` is clamped to at least one
    pub fn new(max_workers: usize, strategy: ErrorStrategy) -> Self {
        Self {
            max_workers: max_workers.max(1),
            strategy,
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    pub fn strategy(&self) -> ErrorStrategy {
        self.strategy
    }

    /// Run `work` over every task.
    ///
    /// Under `FailFast` the first task error cancels the remaining work and
    /// is returned. Under `CollectAll` errors are gathered into the outcome.
    /// Cancellation of `cancel` wins over both and yields
    /// [`EngineError::Cancelled`].
    pub async fn run<T, R, F, Fut>(
        &self,
        tasks: Vec<T>,
        cancel: &CancellationToken,
        work: F,
    ) -> Result<PoolOutcome<R>>
    where
        T: Send + 'static,
        R: Send + 'static,
        F: Fn(T, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(PoolOutcome::empty());
        }
        let workers = self.max_workers.min(total);
        log::debug!(
            "Worker pool starting {} task(s) on {} worker(s), {:?}",
            total,
            workers,
            self.strategy
        );

        // Capacity equals the task count so neither enqueueing nor reporting
        // ever waits on the collector.
        let (job_tx, job_rx) = mpsc::channel::<(usize, T)>(total);
        for job in tasks.into_iter().enumerate() {
            if job_tx.send(job).await.is_err() {
                return Err(EngineError::failed("worker pool queue closed unexpectedly"));
            }
        }
        drop(job_tx);

        let jobs = Arc::new(Mutex::new(job_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<(usize, R)>(total);
        let (error_tx, mut error_rx) = mpsc::channel::<(usize, EngineError)>(total);
        let pool_cancel = cancel.child_token();
        let work = Arc::new(work);

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let jobs = jobs.clone();
            let results = result_tx.clone();
            let errors = error_tx.clone();
            let work = work.clone();
            let token = pool_cancel.clone();

            set.spawn(async move {
                loop {
                    let job = {
                        let mut queue = jobs.lock().await;
                        tokio::select! {
                            biased;
                            _ = token.cancelled() => None,
                            job = queue.recv() => job,
                        }
                    };
                    let Some((index, task)) = job else {
                        break;
                    };

                    let sent = match (*work)(task, token.clone()).await {
                        Ok(value) => results.send((index, value)).await.is_ok(),
                        Err(err) => errors.send((index, err)).await.is_ok(),
                    };
                    if !sent {
                        break;
                    }
                }
            });
        }
        // Workers hold the only senders; both channels close once they exit.
        drop(result_tx);
        drop(error_tx);

        let mut results: Vec<Option<R>> = std::iter::repeat_with(|| None).take(total).collect();
        let mut errors = Vec::new();
        let mut reported = 0usize;
        let mut results_open = true;
        let mut errors_open = true;

        let verdict = loop {
            if reported == total {
                break Ok(());
            }
            if !results_open && !errors_open {
                break Err(EngineError::failed(format!(
                    "worker pool stopped with {} of {} task(s) unreported",
                    total - reported,
                    total
                )));
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Err(EngineError::Cancelled),
                message = result_rx.recv(), if results_open => match message {
                    Some((index, value)) => {
                        results[index] = Some(value);
                        reported += 1;
                    }
                    None => results_open = false,
                },
                message = error_rx.recv(), if errors_open => match message {
                    Some((index, error)) => {
                        reported += 1;
                        if error.is_cancellation() {
                            break Err(error);
                        }
                        match self.strategy {
                            ErrorStrategy::FailFast => {
                                log::debug!("Task {} failed, cancelling remaining work: {}", index, error);
                                break Err(error);
                            }
                            ErrorStrategy::CollectAll => errors.push(TaskFailure { index, error }),
                        }
                    }
                    None => errors_open = false,
                },
            }
        };

        pool_cancel.cancel();
        drop(result_rx);
        drop(error_rx);
        set.abort_all();
        while set.join_next().await.is_some() {}

        verdict.map(|()| PoolOutcome { results, errors })
    }
}

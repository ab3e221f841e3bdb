//! Bounded fan-out of per-record tasks.
//!
//! Keeps up to `max_in_flight` tasks running at once and pulls the next job
//! from the iterator only when a slot frees up, so memory stays proportional
//! to the concurrency limit rather than the batch size.

use std::future::Future;
use std::panic::AssertUnwindSafe;

use engine_logging::{engine_error, engine_info};
use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_IN_FLIGHT: usize = 4;

#[derive(Debug)]
pub struct DispatchOutcome<T> {
    /// `(job index, task output)` in completion order.
    pub results: Vec<(usize, T)>,
    /// Indices of jobs whose task panicked; they are absent from `results`.
    pub panicked: Vec<usize>,
    /// Jobs never started because the batch was cancelled.
    pub not_started: usize,
    pub cancelled: bool,
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    max_in_flight: usize,
    cancel: CancellationToken,
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_IN_FLIGHT)
    }
}

impl Dispatcher {
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            max_in_flight: max_in_flight.max(1),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight
    }

    /// Token shared with every task; cancelling it stops the whole batch.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run `task` once per job and wait for every started task to finish.
    ///
    /// After cancellation no new job is started; tasks already running get
    /// the token and decide themselves how fast to wind down.
    pub async fn run<I, J, F, Fut, T>(&self, jobs: I, mut task: F) -> DispatchOutcome<T>
    where
        I: IntoIterator<Item = J>,
        F: FnMut(usize, J, CancellationToken) -> Fut,
        Fut: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let mut jobs = jobs.into_iter().enumerate();
        let mut join_set = JoinSet::new();
        let mut results = Vec::new();
        let mut panicked = Vec::new();

        loop {
            while join_set.len() < self.max_in_flight && !self.cancel.is_cancelled() {
                let Some((index, job)) = jobs.next() else {
                    break;
                };
                let fut = task(index, job, self.cancel.clone());
                join_set.spawn(async move {
                    (index, AssertUnwindSafe(fut).catch_unwind().await)
                });
            }

            let Some(joined) = join_set.join_next().await else {
                break;
            };
            match joined {
                Ok((index, Ok(output))) => results.push((index, output)),
                Ok((index, Err(_))) => {
                    engine_error!("task for job {} panicked", index);
                    panicked.push(index);
                }
                Err(err) => engine_error!("dispatched task failed to join: {}", err),
            }
        }

        let cancelled = self.cancel.is_cancelled();
        let not_started = if cancelled { jobs.count() } else { 0 };
        if cancelled {
            engine_info!(
                "batch cancelled: {} finished, {} never started",
                results.len(),
                not_started
            );
        }

        DispatchOutcome {
            results,
            panicked,
            not_started,
            cancelled,
        }
    }
}

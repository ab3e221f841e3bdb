use std::time::Duration;

use engine_logging::engine_debug;

use crate::fetch::{Fetcher, ProgressSink};
use crate::{EngineEvent, FetchError, FetchOutput, RecordId, RecordProgress, Stage};

/// Decision returned by the retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Do not retry this error.
    NoRetry,
    /// Retry after the given delay.
    RetryAfter(Duration),
}

/// Exponential backoff with a cap, applied to transient fetch failures only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the first).
    pub max_attempts: u32,
    /// Base delay for backoff.
    pub base_delay: Duration,
    /// Upper bound on backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// `attempt` is 1-based (1 = first attempt).
    pub fn decide(&self, attempt: u32, error: &FetchError) -> RetryDecision {
        if attempt >= self.max_attempts || !error.kind.is_retryable() {
            return RetryDecision::NoRetry;
        }
        // base * 2^(attempt-1), capped.
        let exp = 1u32 << attempt.saturating_sub(1).min(8);
        let delay = self.base_delay.saturating_mul(exp).min(self.max_delay);
        RetryDecision::RetryAfter(delay)
    }
}

/// Wraps another fetcher and retries transient failures.
pub struct RetryingFetcher<F> {
    inner: F,
    policy: RetryPolicy,
}

impl<F: Fetcher> RetryingFetcher<F> {
    pub fn new(inner: F, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait::async_trait]
impl<F: Fetcher> Fetcher for RetryingFetcher<F> {
    async fn fetch(
        &self,
        record_id: RecordId,
        url: &str,
        sink: &dyn ProgressSink,
    ) -> Result<FetchOutput, FetchError> {
        let mut attempt = 1;
        loop {
            match self.inner.fetch(record_id, url, sink).await {
                Ok(mut output) => {
                    output.metadata.attempts = attempt;
                    return Ok(output);
                }
                Err(err) => match self.policy.decide(attempt, &err) {
                    RetryDecision::NoRetry => return Err(err),
                    RetryDecision::RetryAfter(delay) => {
                        engine_debug!(
                            "record {} attempt {} failed ({}), retrying in {:?}: {}",
                            record_id,
                            attempt,
                            err,
                            delay,
                            url
                        );
                        attempt += 1;
                        sink.emit(EngineEvent::Progress(RecordProgress {
                            record_id,
                            stage: Stage::Retrying,
                            bytes: None,
                            attempt: Some(attempt),
                        }));
                        tokio::time::sleep(delay).await;
                    }
                },
            }
        }
    }
}

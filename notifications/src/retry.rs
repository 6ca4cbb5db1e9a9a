//! Retrying delivery through an unreliable sink

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::SinkError;
use crate::event::Event;
use crate::sink::Sink;

/// Policy pacing retries against a degraded sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Consecutive failures tolerated before backing off
    pub threshold: usize,

    /// Pause between attempts once the threshold has been reached
    pub backoff: Duration,
}

impl RetryPolicy {
    /// Create a new retry policy
    pub fn new(threshold: usize, backoff: Duration) -> Self {
        Self { threshold, backoff }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            threshold: 10,
            backoff: Duration::from_secs(1),
        }
    }
}

/// Retries writes to the wrapped sink until they succeed.
///
/// Failed attempts are retried immediately until `threshold` consecutive
/// failures have been seen, after which every retry waits `backoff` first.
/// A success resets the failure count. There is no limit on the number of
/// attempts: a write only returns once the event was accepted, or once this
/// sink was closed, in which case it returns [`SinkError::Closed`].
///
/// Concurrent writes each run their own retry loop, sharing the failure
/// count.
#[derive(Debug)]
pub struct RetryingSink<S> {
    sink: S,
    policy: RetryPolicy,
    failures: AtomicUsize,
    closed: AtomicBool,
    shutdown: CancellationToken,
}

impl<S> RetryingSink<S> {
    /// Wrap `sink` with the given retry policy
    pub fn new(sink: S, policy: RetryPolicy) -> Self {
        Self {
            sink,
            policy,
            failures: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            shutdown: CancellationToken::new(),
        }
    }

    /// The policy in use
    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Consecutive failures seen since the last success
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::Acquire)
    }

    /// Access the wrapped sink
    pub fn inner(&self) -> &S {
        &self.sink
    }

    fn failure(&self) -> usize {
        self.failures.fetch_add(1, Ordering::AcqRel) + 1
    }

    fn reset(&self) {
        self.failures.store(0, Ordering::Release);
    }
}

#[async_trait::async_trait]
impl<S> Sink for RetryingSink<S>
where
    S: Sink,
{
    #[tracing::instrument(level = "debug", skip_all, fields(id = %event.id))]
    async fn write(&self, event: &Event) -> Result<(), SinkError> {
        loop {
            if self.closed.load(Ordering::Acquire) {
                return Err(SinkError::Closed);
            }

            let attempt = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => return Err(SinkError::Closed),
                result = self.sink.write(event) => result,
            };

            let error = match attempt {
                Ok(()) => {
                    self.reset();
                    return Ok(());
                }
                Err(error) => error,
            };

            let failures = self.failure();
            tracing::warn!(%error, failures, "error writing event, retrying");

            if failures >= self.policy.threshold {
                tracing::debug!(backoff = ?self.policy.backoff, "backing off");
                tokio::select! {
                    biased;
                    _ = self.shutdown.cancelled() => return Err(SinkError::Closed),
                    _ = tokio::time::sleep(self.policy.backoff) => {}
                }
            }
        }
    }

    async fn close(&self) -> Result<(), SinkError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(SinkError::AlreadyClosed("retryingsink"));
        }

        self.shutdown.cancel();
        self.sink.close().await
    }
}

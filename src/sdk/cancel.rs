//! Cooperative cancellation for long-running streams.
//!
//! A [`StopToken`] is handed to a streaming call and set by the caller from
//! outside the consuming loop (for example once enough records have been
//! collected). It is observed between stream lines and inside backoff waits,
//! never preemptively: an in-flight read is allowed to finish.

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default polling increment for interruptible waits.
pub const DEFAULT_POLL_INCREMENT: Duration = Duration::from_secs(1);

/// One-shot stop flag shared between a caller and a streaming consumer.
///
/// Clones observe the same flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct StopToken {
    token: CancellationToken,
}

impl StopToken {
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Request that the consumer stops.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

/// Sleep for `duration` in steps of at most `increment`, checking `stop`
/// between steps.
///
/// Returns `true` if the wait was interrupted by cancellation, `false` if it
/// ran to completion.
pub async fn interruptible_sleep(duration: Duration, stop: &StopToken, increment: Duration) -> bool {
    let increment = increment.max(Duration::from_millis(1));
    let mut remaining = duration;

    while !remaining.is_zero() {
        if stop.is_cancelled() {
            return true;
        }
        let step = remaining.min(increment);
        tokio::time::sleep(step).await;
        remaining = remaining.saturating_sub(step);
    }

    stop.is_cancelled()
}

/// The waiting primitive used for every retry pause and stream backoff.
#[async_trait]
pub trait Sleeper: Send + Sync + std::fmt::Debug {
    /// Wait for `duration`. Returns `true` if `stop` was set during the wait.
    async fn sleep(&self, duration: Duration, stop: &StopToken) -> bool;
}

/// Sleeper that polls the stop flag every `increment`.
#[derive(Debug, Clone)]
pub struct PollingSleeper {
    increment: Duration,
}

impl PollingSleeper {
    pub fn new(increment: Duration) -> Self {
        Self { increment }
    }
}

impl Default for PollingSleeper {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INCREMENT)
    }
}

#[async_trait]
impl Sleeper for PollingSleeper {
    async fn sleep(&self, duration: Duration, stop: &StopToken) -> bool {
        interruptible_sleep(duration, stop, self.increment).await
    }
}

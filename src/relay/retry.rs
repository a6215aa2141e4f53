// Bounded retry with cooperative cancellation

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cooperative stop signal, polled at every attempt boundary.
///
/// Clones share the same flag, so a token handed to a running task can
/// be cancelled from the outside. Cancellation is never preemptive: an
/// attempt already in flight completes before the signal is observed.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Result of a retried operation.
#[derive(Debug)]
pub enum RetryOutcome<T, E> {
    /// An attempt succeeded.
    Done(T),
    /// Every attempt failed; holds the last error.
    Exhausted(E),
    /// The stop signal was observed before an attempt began.
    Cancelled,
}

impl<T, E> RetryOutcome<T, E> {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Run `op` up to `attempts` times with a fixed `delay` between
/// attempts, checking `cancel` before each one.
///
/// `op` receives the 1-based attempt number. The delay is not observed
/// after the final attempt. An `attempts` of zero is treated as one.
pub async fn with_retry<T, E, F, Fut>(
    attempts: u32,
    delay: Duration,
    cancel: &CancelToken,
    mut op: F,
) -> RetryOutcome<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: fmt::Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return RetryOutcome::Cancelled;
        }
        match op(attempt).await {
            Ok(value) => return RetryOutcome::Done(value),
            Err(err) => {
                if attempt == attempts {
                    return RetryOutcome::Exhausted(err);
                }
                log::warn!("attempt {}/{} failed: {}", attempt, attempts, err);
            }
        }
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

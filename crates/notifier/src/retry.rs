//! Bounded retry with a fixed delay, stopped by context cancellation.
//!
//! Shared by the Teams and email senders. One call runs `1 + retries`
//! attempts at most. The context is checked before every attempt, including
//! the first; a transport call that already started is allowed to finish.

use std::future::Future;
use std::time::Duration;

use crate::context::DeliveryContext;
use crate::error::NotifyError;

/// Retry count and spacing for one delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first one fails.
    pub retries: u32,
    /// Pause between attempts.
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, delay: Duration) -> Self {
        Self { retries, delay }
    }

    /// Total attempts allowed, including the first.
    pub fn attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

/// Run `attempt` until it succeeds, the budget runs out or `ctx` is done.
///
/// `attempt` receives the 1-based attempt number. On exhaustion the last
/// error is returned wrapped with the attempt count; on cancellation the
/// reason is combined with the last error seen, if any.
pub async fn retry_with_delay<T, F, Fut>(
    ctx: &DeliveryContext,
    policy: RetryPolicy,
    mut attempt: F,
) -> Result<T, NotifyError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, NotifyError>>,
{
    let allowed = policy.attempts();
    let mut last: Option<NotifyError> = None;
    let mut number = 1;

    loop {
        if let Some(reason) = ctx.err() {
            return Err(NotifyError::Aborted {
                attempt: number,
                allowed,
                reason,
                last: last.map(Box::new),
            });
        }

        match attempt(number).await {
            Ok(value) => {
                if number > 1 {
                    tracing::debug!(attempt = number, allowed, "Delivery succeeded after retry");
                }
                return Ok(value);
            }
            Err(err) => {
                tracing::error!(attempt = number, allowed, error = %err, "Delivery attempt failed");

                if number >= allowed {
                    return Err(NotifyError::AttemptsExhausted {
                        attempts: allowed,
                        source: Box::new(err),
                    });
                }
                last = Some(err);

                if ctx.err().is_none() {
                    tracing::debug!(delay = ?policy.delay, "Waiting before next attempt");
                    tokio::select! {
                        _ = tokio::time::sleep(policy.delay) => {}
                        _ = ctx.done() => {}
                    }
                }
                number += 1;
            }
        }
    }
}

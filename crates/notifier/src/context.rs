//! Cancellation scope for one delivery attempt.

use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

/// Child of the root cancellation token with its own deadline.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    token: CancellationToken,
    deadline: Instant,
}

impl DeliveryContext {
    /// Derive a context from `parent` that expires after `timeout`.
    pub fn child_of(parent: &CancellationToken, timeout: Duration) -> Self {
        Self {
            token: parent.child_token(),
            deadline: Instant::now() + timeout,
        }
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Reason the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            Some(ContextError::Cancelled)
        } else if Instant::now() >= self.deadline {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Resolves once the parent is cancelled or the deadline passes.
    pub async fn done(&self) -> ContextError {
        tokio::select! {
            _ = self.token.cancelled() => ContextError::Cancelled,
            _ = tokio::time::sleep_until(self.deadline) => ContextError::DeadlineExceeded,
        }
    }

    /// Release the context. Tasks waiting on [`done`](Self::done) observe cancellation.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

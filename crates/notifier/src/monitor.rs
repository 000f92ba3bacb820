//! Periodic queue occupancy reporting.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::queue::QueueDepth;

/// Logs the depth of every watched queue on a fixed interval.
pub struct QueueMonitor {
    queues: Vec<Arc<dyn QueueDepth>>,
    interval: Duration,
}

impl QueueMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            queues: Vec::new(),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    pub fn watch(mut self, queue: impl QueueDepth + 'static) -> Self {
        self.queues.push(Arc::new(queue));
        self
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Log current depths and return the total number of queued items.
    pub fn report(&self) -> usize {
        let mut total = 0;
        for queue in &self.queues {
            let depth = queue.depth();
            if depth > 0 {
                tracing::debug!(
                    queue = queue.name(),
                    depth,
                    capacity = queue.capacity(),
                    "{}/{} items in {}",
                    depth,
                    queue.capacity(),
                    queue.name()
                );
            }
            total += depth;
        }
        if total == 0 {
            tracing::debug!("0 items queued");
        }
        total
    }

    /// Report until `root` is cancelled.
    pub async fn run(self, root: CancellationToken) {
        if self.queues.is_empty() {
            tracing::error!("No queues to monitor, queue monitor exiting");
            return;
        }

        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = root.cancelled() => {
                    tracing::debug!("Queue monitor stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.report();
                }
            }
        }
    }
}

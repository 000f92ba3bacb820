//! Delivery statistics.
//!
//! Counters only grow. They are owned by a single aggregator task and
//! changed through [`StatsUpdate`] messages; readers get copies through a
//! `watch` channel. The aggregator stops once the last recorder is gone, so
//! increments made during shutdown still land in the final totals.

use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, MissedTickBehavior};

use tripwire_common::types::ChannelKind;

use crate::queue::{NamedQueue, named_channel};

/// One counter increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsUpdate {
    Received,
    Sent(ChannelKind),
    Succeeded(ChannelKind),
    Failed(ChannelKind),
    Cancelled(ChannelKind),
}

/// Counters for a single channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelStats {
    pub sent: u64,
    pub success: u64,
    pub failure: u64,
    /// Abandoned before an outcome was known. Neither success nor failure.
    pub cancelled: u64,
}

impl ChannelStats {
    /// Handed to the channel but not yet resolved.
    pub fn pending(&self) -> u64 {
        self.sent
            .saturating_sub(self.success + self.failure + self.cancelled)
    }
}

/// Snapshot of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NotifyStats {
    pub received: u64,
    pub teams: ChannelStats,
    pub email: ChannelStats,
}

impl NotifyStats {
    pub fn channel(&self, kind: ChannelKind) -> &ChannelStats {
        match kind {
            ChannelKind::Teams => &self.teams,
            ChannelKind::Email => &self.email,
        }
    }

    fn channel_mut(&mut self, kind: ChannelKind) -> &mut ChannelStats {
        match kind {
            ChannelKind::Teams => &mut self.teams,
            ChannelKind::Email => &mut self.email,
        }
    }

    pub fn apply(&mut self, update: StatsUpdate) {
        match update {
            StatsUpdate::Received => self.received += 1,
            StatsUpdate::Sent(kind) => self.channel_mut(kind).sent += 1,
            StatsUpdate::Succeeded(kind) => self.channel_mut(kind).success += 1,
            StatsUpdate::Failed(kind) => self.channel_mut(kind).failure += 1,
            StatsUpdate::Cancelled(kind) => self.channel_mut(kind).cancelled += 1,
        }
    }

    pub fn total_success(&self) -> u64 {
        self.teams.success + self.email.success
    }

    pub fn total_failure(&self) -> u64 {
        self.teams.failure + self.email.failure
    }

    pub fn total_pending(&self) -> u64 {
        self.teams.pending() + self.email.pending()
    }
}

/// Cheap handle for submitting increments without blocking the caller.
#[derive(Debug, Clone)]
pub struct StatsRecorder {
    tx: mpsc::Sender<StatsUpdate>,
}

impl StatsRecorder {
    /// Queue `update`. When the queue is full the send moves to its own task.
    pub fn record(&self, update: StatsUpdate) {
        match self.tx.try_send(update) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(update)) => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let _ = tx.send(update).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(update)) => {
                tracing::debug!(?update, "Stats aggregator stopped, dropping update");
            }
        }
    }
}

/// Single consumer of [`StatsUpdate`] messages.
pub struct StatsAggregator {
    rx: mpsc::Receiver<StatsUpdate>,
    queue: NamedQueue<StatsUpdate>,
    snapshot: watch::Sender<NotifyStats>,
    interval: Duration,
}

impl StatsAggregator {
    /// Aggregator summarizing every `interval`, plus its recorder handle.
    pub fn new(interval: Duration, capacity: usize) -> (Self, StatsRecorder) {
        let (tx, rx, queue) = named_channel("stats updates", capacity);
        let (snapshot, _) = watch::channel(NotifyStats::default());
        (
            Self {
                rx,
                queue,
                snapshot,
                interval: interval.max(Duration::from_millis(1)),
            },
            StatsRecorder { tx },
        )
    }

    pub fn subscribe(&self) -> watch::Receiver<NotifyStats> {
        self.snapshot.subscribe()
    }

    pub fn queue(&self) -> NamedQueue<StatsUpdate> {
        self.queue.clone()
    }

    /// Apply updates until every [`StatsRecorder`] is dropped, then return
    /// the final counters.
    pub async fn run(mut self) -> NotifyStats {
        let mut stats = NotifyStats::default();
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                update = self.rx.recv() => match update {
                    Some(update) => {
                        stats.apply(update);
                        self.snapshot.send_replace(stats);
                    }
                    None => break,
                },

                _ = ticker.tick() => log_summary(&stats),
            }
        }

        log_summary(&stats);
        stats
    }
}

fn log_summary(stats: &NotifyStats) {
    tracing::info!(
        received = stats.received,
        pending = stats.total_pending(),
        success = stats.total_success(),
        failure = stats.total_failure(),
        "Notification totals"
    );
    for kind in [ChannelKind::Teams, ChannelKind::Email] {
        let channel = stats.channel(kind);
        tracing::info!(
            channel = %kind,
            sent = channel.sent,
            pending = channel.pending(),
            success = channel.success,
            failure = channel.failure,
            cancelled = channel.cancelled,
            "Channel notification stats"
        );
    }
}

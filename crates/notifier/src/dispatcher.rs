//! Fans records out to channel workers and drives shutdown.
//!
//! Every inbound record is handed to each enabled channel on its own short
//! task, so a full queue on one channel never delays the other or the
//! intake of the next record. With no channel enabled the inbound queue is
//! still drained and records are discarded.
//!
//! Shutdown starts when the root token is cancelled. For each channel the
//! dispatcher tallies its result queue until the worker closes it and joins
//! the worker, bounded by the configured shutdown timeout. Stats are final
//! only after every channel has been through that step.

use std::future::poll_fn;
use std::sync::Arc;
use std::task::Poll;

use tokio::sync::{mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tripwire_common::config::{AppConfig, NotifyConfig};
use tripwire_common::types::{ChannelKind, EventRecord};

use crate::email::EmailSender;
use crate::error::NotifyError;
use crate::monitor::QueueMonitor;
use crate::queue::named_channel;
use crate::render::Branding;
use crate::result::{DeliveryResult, Outcome};
use crate::sender::MessageSender;
use crate::smtp::SmtpClient;
use crate::stats::{NotifyStats, StatsAggregator, StatsRecorder, StatsUpdate};
use crate::teams::{TeamsClient, TeamsSender};
use crate::worker::{ChannelWorker, WorkerState};

/// Builder for the notification pipeline.
pub struct Dispatcher {
    config: NotifyConfig,
    senders: Vec<Arc<dyn MessageSender>>,
}

impl Dispatcher {
    pub fn new(config: NotifyConfig) -> Self {
        Self {
            config,
            senders: Vec::new(),
        }
    }

    /// Enable the channels configured in `config`.
    pub fn from_app_config(config: &AppConfig) -> Result<Self, NotifyError> {
        let branding = Branding::new(&config.app_name, &config.app_url);
        let mut dispatcher = Self::new(config.notify);

        if let Some(teams) = &config.teams {
            let client = TeamsClient::new(teams.settings.base_timeout)?;
            dispatcher = dispatcher.with_sender(Arc::new(TeamsSender::new(
                teams,
                branding.clone(),
                Arc::new(client),
            )));
        }

        if let Some(email) = &config.email {
            let client = SmtpClient::new(email.settings.base_timeout);
            dispatcher = dispatcher.with_sender(Arc::new(EmailSender::new(
                email.clone(),
                branding,
                Arc::new(client),
            )));
        }

        Ok(dispatcher)
    }

    /// Enable a channel. A second sender for the same channel replaces the first.
    pub fn with_sender(mut self, sender: Arc<dyn MessageSender>) -> Self {
        let kind = sender.channel();
        if let Some(existing) = self.senders.iter_mut().find(|s| s.channel() == kind) {
            tracing::warn!(channel = %kind, "Replacing previously registered sender");
            *existing = sender;
        } else {
            self.senders.push(sender);
        }
        self
    }

    pub fn channels(&self) -> Vec<ChannelKind> {
        self.senders.iter().map(|s| s.channel()).collect()
    }

    /// Start the pipeline. It runs until `root` is cancelled.
    pub fn spawn(self, root: CancellationToken) -> DispatcherHandle {
        let (inbound_tx, inbound_rx, inbound_queue) =
            named_channel("inbound records", self.config.queue_depth);
        let (aggregator, recorder) =
            StatsAggregator::new(self.config.stats_interval, self.config.queue_depth);
        let stats = aggregator.subscribe();

        let monitor = QueueMonitor::new(self.config.queue_interval)
            .watch(inbound_queue)
            .watch(aggregator.queue());

        let span = tracing::info_span!("dispatcher");
        let join = tokio::spawn(
            self.run(root, inbound_rx, aggregator, recorder, monitor)
                .instrument(span),
        );

        DispatcherHandle {
            inbound: inbound_tx,
            stats,
            join,
        }
    }

    async fn run(
        self,
        root: CancellationToken,
        mut inbound: mpsc::Receiver<EventRecord>,
        aggregator: StatsAggregator,
        recorder: StatsRecorder,
        mut monitor: QueueMonitor,
    ) -> NotifyStats {
        let depth = self.config.queue_depth;
        let mut channels = Vec::with_capacity(self.senders.len());

        for sender in self.senders {
            let kind = sender.channel();
            let (records_tx, records_rx, records_queue) =
                named_channel(format!("{kind} records"), depth);
            let (results_tx, results_rx, results_queue) =
                named_channel(format!("{kind} results"), depth);

            let worker = ChannelWorker::new(sender, records_rx, results_tx, root.clone(), depth);
            monitor = monitor
                .watch(records_queue)
                .watch(results_queue)
                .watch(worker.task_queue());

            channels.push(ChannelHandle {
                kind,
                records: records_tx,
                results: results_rx,
                worker: worker.spawn(),
            });
        }

        if channels.is_empty() {
            tracing::warn!("No notification channels enabled, inbound records will be discarded");
        } else {
            let enabled: Vec<String> = channels.iter().map(|c| c.kind.to_string()).collect();
            tracing::info!(channels = ?enabled, "Notification channels enabled");
        }

        let stats_task = tokio::spawn(
            aggregator
                .run()
                .instrument(tracing::info_span!("stats_aggregator")),
        );
        let monitor_task = tokio::spawn(
            monitor
                .run(root.clone())
                .instrument(tracing::debug_span!("queue_monitor")),
        );

        loop {
            tokio::select! {
                biased;

                _ = root.cancelled() => {
                    tracing::info!("Received shutdown signal, stopping notification dispatch");
                    break;
                }

                Some(result) = next_result(&mut channels) => {
                    tally(&recorder, &result);
                }

                Some(record) = inbound.recv() => {
                    fan_out(&channels, &recorder, record);
                }
            }
        }

        // Producers blocked on a full inbound queue are released here.
        drop(inbound);

        for channel in channels {
            channel
                .shutdown(&recorder, self.config.shutdown_timeout)
                .await;
        }

        // Last recorder; the aggregator finishes once pending increments land.
        drop(recorder);

        if let Err(err) = monitor_task.await {
            tracing::error!(error = %err, "Queue monitor task failed");
        }
        let stats = match stats_task.await {
            Ok(stats) => stats,
            Err(err) => {
                tracing::error!(error = %err, "Stats aggregator task failed");
                NotifyStats::default()
            }
        };

        tracing::info!("Notification dispatcher stopped");
        stats
    }
}

/// Running pipeline: the producer side of the inbound queue plus status.
pub struct DispatcherHandle {
    inbound: mpsc::Sender<EventRecord>,
    stats: watch::Receiver<NotifyStats>,
    join: JoinHandle<NotifyStats>,
}

impl DispatcherHandle {
    /// Producer handle. `send` waits while the inbound queue is full.
    pub fn sender(&self) -> mpsc::Sender<EventRecord> {
        self.inbound.clone()
    }

    /// Live view of the delivery counters.
    pub fn stats(&self) -> watch::Receiver<NotifyStats> {
        self.stats.clone()
    }

    /// Wait for the dispatcher to finish shutting down.
    pub async fn wait(self) -> Result<NotifyStats, JoinError> {
        drop(self.inbound);
        self.join.await
    }
}

struct ChannelHandle {
    kind: ChannelKind,
    records: mpsc::Sender<Arc<EventRecord>>,
    results: mpsc::Receiver<DeliveryResult>,
    worker: JoinHandle<WorkerState>,
}

impl ChannelHandle {
    /// Tally whatever results are still queued, then join the worker, all
    /// within `timeout`.
    async fn shutdown(self, recorder: &StatsRecorder, timeout: std::time::Duration) {
        let ChannelHandle {
            kind,
            records,
            mut results,
            worker,
        } = self;
        drop(records);

        let stopped = tokio::time::timeout(timeout, async move {
            while let Some(result) = results.recv().await {
                tally(recorder, &result);
            }
            worker.await
        })
        .await;

        match stopped {
            Ok(Ok(state)) => tracing::debug!(channel = %kind, ?state, "Channel worker stopped"),
            Ok(Err(err)) => tracing::error!(channel = %kind, error = %err, "Channel worker task failed"),
            Err(_) => tracing::warn!(
                channel = %kind,
                timeout = ?timeout,
                "Timed out waiting for channel worker to stop"
            ),
        }
    }
}

/// Next result from any channel, or `None` once every result queue is closed.
async fn next_result(channels: &mut [ChannelHandle]) -> Option<DeliveryResult> {
    poll_fn(|cx| {
        let mut open = false;
        for channel in channels.iter_mut() {
            match channel.results.poll_recv(cx) {
                Poll::Ready(Some(result)) => return Poll::Ready(Some(result)),
                Poll::Ready(None) => {}
                Poll::Pending => open = true,
            }
        }
        if open { Poll::Pending } else { Poll::Ready(None) }
    })
    .await
}

fn fan_out(channels: &[ChannelHandle], recorder: &StatsRecorder, record: EventRecord) {
    if channels.is_empty() {
        recorder.record(StatsUpdate::Received);
        tracing::debug!(record_id = %record.id(), "No channels enabled, discarding record");
        return;
    }

    let record = Arc::new(record);
    for channel in channels {
        recorder.record(StatsUpdate::Sent(channel.kind));

        let tx = channel.records.clone();
        let record = Arc::clone(&record);
        let kind = channel.kind;
        tokio::spawn(async move {
            let record_id = record.id();
            if tx.send(record).await.is_err() {
                tracing::debug!(channel = %kind, record_id = %record_id, "Channel worker stopped, record not delivered");
            }
        });
    }

    // Sent counts land first so a snapshot never shows the record as
    // received with nothing pending.
    recorder.record(StatsUpdate::Received);
}

/// Count a result. Cancellations are neither successes nor failures and
/// worker status notices are not counted at all.
fn tally(recorder: &StatsRecorder, result: &DeliveryResult) {
    match result.outcome() {
        Outcome::Succeeded => recorder.record(StatsUpdate::Succeeded(result.channel)),
        Outcome::Failed => recorder.record(StatsUpdate::Failed(result.channel)),
        Outcome::Cancelled => recorder.record(StatsUpdate::Cancelled(result.channel)),
        Outcome::Status => {}
    }
    log_result(result);
}

fn log_result(result: &DeliveryResult) {
    match (&result.error, result.success) {
        (Some(err), _) => {
            tracing::error!(channel = %result.channel, error = %err, "Notification delivery failed")
        }
        (None, true) => {
            tracing::info!(channel = %result.channel, message = %result.message, "Notification delivered")
        }
        (None, false) => {
            tracing::debug!(channel = %result.channel, message = %result.message, "Notification not delivered")
        }
    }
}

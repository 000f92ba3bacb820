//! Channel worker: one long-lived task per enabled channel.
//!
//! Owns the channel's [`Scheduler`], turns each inbound record into an
//! independently timed delivery task and forwards every result to the
//! dispatcher. Delivery tasks run concurrently; a slow record never blocks
//! scheduling of the next one.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use tripwire_common::types::{ChannelKind, EventRecord};

use crate::context::DeliveryContext;
use crate::queue::{NamedQueue, named_channel};
use crate::result::{DeliveryResult, Outcome};
use crate::scheduler::Scheduler;
use crate::sender::MessageSender;
use crate::timeout::notification_timeout;

/// Lifecycle of a [`ChannelWorker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Running,
    ShuttingDown,
    Stopped,
}

pub struct ChannelWorker {
    sender: Arc<dyn MessageSender>,
    scheduler: Scheduler,
    inbound: mpsc::Receiver<Arc<EventRecord>>,
    outbound: mpsc::Sender<DeliveryResult>,
    task_results: mpsc::Receiver<DeliveryResult>,
    task_tx: mpsc::Sender<DeliveryResult>,
    task_queue: NamedQueue<DeliveryResult>,
    root: CancellationToken,
    state: WorkerState,
}

impl ChannelWorker {
    /// Build a worker reading `inbound` and reporting on `outbound`.
    ///
    /// `queue_depth` sizes the private queue delivery tasks report on.
    pub fn new(
        sender: Arc<dyn MessageSender>,
        inbound: mpsc::Receiver<Arc<EventRecord>>,
        outbound: mpsc::Sender<DeliveryResult>,
        root: CancellationToken,
        queue_depth: usize,
    ) -> Self {
        let channel = sender.channel();
        let scheduler = Scheduler::new(sender.settings().rate_limit);
        let (task_tx, task_results, task_queue) =
            named_channel(format!("{channel} delivery results (private)"), queue_depth);

        Self {
            sender,
            scheduler,
            inbound,
            outbound,
            task_results,
            task_tx,
            task_queue,
            root,
            state: WorkerState::Running,
        }
    }

    pub fn channel(&self) -> ChannelKind {
        self.sender.channel()
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Depth handle for the private result queue.
    pub fn task_queue(&self) -> NamedQueue<DeliveryResult> {
        self.task_queue.clone()
    }

    /// Run the worker on its own task. The handle resolves once it has stopped.
    pub fn spawn(self) -> JoinHandle<WorkerState> {
        let span = tracing::info_span!("channel_worker", channel = %self.channel());
        tokio::spawn(self.run().instrument(span))
    }

    /// Event loop. Returns when the root token is cancelled.
    pub async fn run(mut self) -> WorkerState {
        let channel = self.channel();
        tracing::debug!(rate_limit = ?self.scheduler.delay(), "Channel worker started");

        loop {
            tokio::select! {
                biased;

                _ = self.root.cancelled() => {
                    self.state = WorkerState::ShuttingDown;
                    while let Ok(result) = self.task_results.try_recv() {
                        self.forward(result).await;
                    }
                    let status = DeliveryResult::status(
                        channel,
                        format!("Received shutdown signal, {channel} worker shutting down"),
                    );
                    tracing::debug!(message = %status.message, "Channel worker shutting down");
                    if self.outbound.send(status).await.is_err() {
                        tracing::debug!("Dispatcher result queue closed before final status");
                    }
                    break;
                }

                Some(result) = self.task_results.recv() => {
                    self.forward(result).await;
                }

                Some(record) = self.inbound.recv() => {
                    self.dispatch(record).await;
                }
            }
        }

        // Dropping `outbound` here closes this worker's half of the result queue.
        self.state = WorkerState::Stopped;
        self.state
    }

    /// Schedule one record and launch its delivery task.
    async fn dispatch(&mut self, record: Arc<EventRecord>) {
        let channel = self.channel();
        let settings = self.sender.settings();
        let schedule = self.scheduler.next();
        let timeout =
            notification_timeout(settings.base_timeout, schedule, settings.retries, settings.retry_delay);
        let ctx = DeliveryContext::child_of(&self.root, timeout);

        tracing::debug!(
            record_id = %record.id(),
            action = %record.action(),
            wait = ?schedule.saturating_duration_since(tokio::time::Instant::now()),
            timeout = ?timeout,
            "Scheduled delivery"
        );

        if let Some(reason) = ctx.err() {
            let result = DeliveryResult::cancelled(
                channel,
                format!("{reason} before {channel} delivery started, aborting"),
            );
            self.forward(result).await;
            return;
        }

        let sender = Arc::clone(&self.sender);
        let results = self.task_tx.clone();
        let span = tracing::debug_span!("delivery", record_id = %record.id());
        tokio::spawn(
            async move {
                let result = sender.send(&ctx, &record, schedule).await;
                ctx.cancel();
                if results.send(result).await.is_err() {
                    tracing::debug!("Channel worker stopped before delivery result was collected");
                }
            }
            .instrument(span),
        );
    }

    /// Log a delivery result and pass it on to the dispatcher.
    async fn forward(&self, result: DeliveryResult) {
        match result.outcome() {
            Outcome::Failed => {
                if let Some(err) = &result.error {
                    tracing::error!(error = %err, "Delivery failed");
                }
            }
            Outcome::Succeeded | Outcome::Cancelled | Outcome::Status => {
                tracing::debug!(message = %result.message, success = result.success, "Delivery finished");
            }
        }

        if self.outbound.send(result).await.is_err() {
            tracing::debug!("Dispatcher result queue closed, dropping delivery result");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use chrono::Utc;
    use tokio::time::Instant;
    use tripwire_common::config::ChannelSettings;
    use tripwire_common::types::{Action, AlertContext};

    use super::*;

    /// Records the schedule it was handed and succeeds immediately.
    struct RecordingSender {
        settings: ChannelSettings,
        schedules: std::sync::Mutex<Vec<Instant>>,
        calls: AtomicU32,
    }

    #[async_trait]
    impl MessageSender for RecordingSender {
        fn channel(&self) -> ChannelKind {
            ChannelKind::Teams
        }

        fn settings(&self) -> ChannelSettings {
            self.settings
        }

        async fn send(
            &self,
            _ctx: &DeliveryContext,
            _record: &EventRecord,
            schedule: Instant,
        ) -> DeliveryResult {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.schedules.lock().unwrap().push(schedule);
            DeliveryResult::succeeded(ChannelKind::Teams, "sent")
        }
    }

    fn record() -> Arc<EventRecord> {
        Arc::new(
            EventRecord::new(
                AlertContext {
                    arrival_time: Utc::now(),
                    ..Default::default()
                },
                None,
                Some("x".to_string()),
                Action::Disabled,
                vec![],
            )
            .unwrap(),
        )
    }

    fn recording_sender(rate_limit: Duration) -> Arc<RecordingSender> {
        Arc::new(RecordingSender {
            settings: ChannelSettings {
                rate_limit,
                base_timeout: Duration::from_secs(10),
                retries: 2,
                retry_delay: Duration::from_secs(5),
            },
            schedules: std::sync::Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_back_to_back_records_are_spaced() {
        let sender = recording_sender(Duration::from_secs(5));
        let (in_tx, in_rx) = mpsc::channel(5);
        let (out_tx, mut out_rx) = mpsc::channel(5);
        let root = CancellationToken::new();

        let worker = ChannelWorker::new(sender.clone(), in_rx, out_tx, root.clone(), 5);
        assert_eq!(worker.state(), WorkerState::Running);
        let handle = worker.spawn();

        in_tx.send(record()).await.unwrap();
        in_tx.send(record()).await.unwrap();

        assert!(out_rx.recv().await.unwrap().success);
        assert!(out_rx.recv().await.unwrap().success);

        let schedules = sender.schedules.lock().unwrap().clone();
        assert_eq!(schedules.len(), 2);
        let (earlier, later) = if schedules[0] <= schedules[1] {
            (schedules[0], schedules[1])
        } else {
            (schedules[1], schedules[0])
        };
        assert!(later - earlier >= Duration::from_secs(5));

        root.cancel();
        assert_eq!(handle.await.unwrap(), WorkerState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_emits_final_status_and_closes_queue() {
        let sender = recording_sender(Duration::from_millis(1));
        let (_in_tx, in_rx) = mpsc::channel::<Arc<EventRecord>>(5);
        let (out_tx, mut out_rx) = mpsc::channel(5);
        let root = CancellationToken::new();

        let handle = ChannelWorker::new(sender.clone(), in_rx, out_tx, root.clone(), 5).spawn();
        root.cancel();

        let status = out_rx.recv().await.unwrap();
        assert!(!status.success);
        assert!(status.error.is_none());
        assert!(status.message.contains("shutting down"));
        assert_eq!(status.outcome(), Outcome::Status);

        assert!(out_rx.recv().await.is_none());
        assert_eq!(handle.await.unwrap(), WorkerState::Stopped);
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_shutdown_forwards_results_already_collected() {
        let sender = recording_sender(Duration::from_millis(1));
        let (_in_tx, in_rx) = mpsc::channel::<Arc<EventRecord>>(5);
        let (out_tx, mut out_rx) = mpsc::channel(5);
        let root = CancellationToken::new();

        let worker = ChannelWorker::new(sender, in_rx, out_tx, root.clone(), 5);
        worker
            .task_tx
            .send(DeliveryResult::succeeded(ChannelKind::Teams, "sent before shutdown"))
            .await
            .unwrap();
        root.cancel();

        assert_eq!(worker.run().await, WorkerState::Stopped);

        let delivered = out_rx.recv().await.unwrap();
        assert_eq!(delivered.outcome(), Outcome::Succeeded);
        assert_eq!(delivered.message, "sent before shutdown");
        assert_eq!(out_rx.recv().await.unwrap().outcome(), Outcome::Status);
        assert!(out_rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_context_skips_delivery() {
        let sender = Arc::new(RecordingSender {
            settings: ChannelSettings {
                rate_limit: Duration::ZERO,
                base_timeout: Duration::ZERO,
                retries: 0,
                retry_delay: Duration::ZERO,
            },
            schedules: std::sync::Mutex::new(Vec::new()),
            calls: AtomicU32::new(0),
        });
        let (in_tx, in_rx) = mpsc::channel(5);
        let (out_tx, mut out_rx) = mpsc::channel(5);
        let root = CancellationToken::new();

        let handle = ChannelWorker::new(sender.clone(), in_rx, out_tx, root.clone(), 5).spawn();
        in_tx.send(record()).await.unwrap();

        let result = out_rx.recv().await.unwrap();
        assert_eq!(result.outcome(), Outcome::Cancelled);
        assert!(result.message.contains("deadline exceeded"));
        assert_eq!(sender.calls.load(Ordering::SeqCst), 0);

        root.cancel();
        assert_eq!(handle.await.unwrap(), WorkerState::Stopped);
    }
}

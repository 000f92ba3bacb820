//! Channel-agnostic delivery surface used by the channel workers.

use async_trait::async_trait;
use tokio::time::Instant;

use tripwire_common::config::ChannelSettings;
use tripwire_common::types::{ChannelKind, EventRecord};

use crate::context::DeliveryContext;
use crate::result::DeliveryResult;

/// Renders and delivers one record to one channel.
#[async_trait]
pub trait MessageSender: Send + Sync {
    fn channel(&self) -> ChannelKind;

    fn settings(&self) -> ChannelSettings;

    /// Deliver `record` no earlier than `schedule`, within `ctx`.
    async fn send(
        &self,
        ctx: &DeliveryContext,
        record: &EventRecord,
        schedule: Instant,
    ) -> DeliveryResult;
}

/// Block until `schedule` or until `ctx` is done.
///
/// Returns the cancellation result to hand back when the slot was not
/// reached with a live context.
pub async fn wait_for_slot(
    ctx: &DeliveryContext,
    channel: ChannelKind,
    schedule: Instant,
) -> Result<(), DeliveryResult> {
    tracing::debug!(
        channel = %channel,
        wait = ?schedule.saturating_duration_since(Instant::now()),
        "Waiting for scheduled send slot"
    );

    tokio::select! {
        reason = ctx.done() => {
            return Err(DeliveryResult::cancelled(
                channel,
                format!("{reason} while waiting for scheduled {channel} send"),
            ));
        }
        _ = tokio::time::sleep_until(schedule) => {}
    }

    // The slot and the deadline can fire together.
    if let Some(reason) = ctx.err() {
        return Err(DeliveryResult::cancelled(
            channel,
            format!("{reason} at scheduled {channel} send time"),
        ));
    }

    Ok(())
}

/// Wall clock time for confirmation messages.
pub(crate) fn clock_time() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::result::Outcome;

    #[tokio::test(start_paused = true)]
    async fn test_waits_until_schedule() {
        let root = CancellationToken::new();
        let ctx = DeliveryContext::child_of(&root, Duration::from_secs(30));
        let schedule = Instant::now() + Duration::from_secs(5);

        wait_for_slot(&ctx, ChannelKind::Email, schedule).await.unwrap();
        assert!(Instant::now() >= schedule);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_while_waiting_is_not_an_error() {
        let root = CancellationToken::new();
        let ctx = DeliveryContext::child_of(&root, Duration::from_secs(30));
        let schedule = Instant::now() + Duration::from_secs(20);

        let canceller = root.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let result = wait_for_slot(&ctx, ChannelKind::Teams, schedule)
            .await
            .unwrap_err();
        assert_eq!(result.outcome(), Outcome::Cancelled);
        assert!(result.message.contains("context cancelled"));
        assert!(Instant::now() < schedule);
    }
}

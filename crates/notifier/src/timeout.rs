//! Deadline sizing for one delivery attempt.

use std::time::Duration;

use tokio::time::Instant;

/// Overall timeout for a delivery scheduled at `schedule`.
///
/// Covers the wait for the rate-limit slot, one base attempt and the delay
/// added by every retry.
pub fn notification_timeout(
    base: Duration,
    schedule: Instant,
    retries: u32,
    retry_delay: Duration,
) -> Duration {
    notification_timeout_at(Instant::now(), base, schedule, retries, retry_delay)
}

/// Same as [`notification_timeout`] with an explicit current instant.
pub fn notification_timeout_at(
    now: Instant,
    base: Duration,
    schedule: Instant,
    retries: u32,
    retry_delay: Duration,
) -> Duration {
    base.saturating_add(schedule.saturating_duration_since(now))
        .saturating_add(retry_delay.saturating_mul(retries))
}

//! Outcome of one delivery attempt.

use tripwire_common::types::ChannelKind;

use crate::error::NotifyError;

/// How a [`DeliveryResult`] is tallied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed,
    /// Did not happen: cancelled or timed out.
    Cancelled,
    /// Worker lifecycle notice, not tied to any record.
    Status,
}

/// Uniform result returned by every message sender.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub channel: ChannelKind,
    pub message: String,
    pub error: Option<NotifyError>,
    pub success: bool,
    pub status: bool,
}

impl DeliveryResult {
    pub fn succeeded(channel: ChannelKind, message: impl Into<String>) -> Self {
        Self {
            channel,
            message: message.into(),
            error: None,
            success: true,
            status: false,
        }
    }

    pub fn failed(channel: ChannelKind, error: NotifyError) -> Self {
        Self {
            channel,
            message: String::new(),
            error: Some(error),
            success: false,
            status: false,
        }
    }

    /// Non-success without an error payload.
    pub fn cancelled(channel: ChannelKind, message: impl Into<String>) -> Self {
        Self {
            channel,
            message: message.into(),
            error: None,
            success: false,
            status: false,
        }
    }

    /// Lifecycle notice from a worker. Never counted against a record.
    pub fn status(channel: ChannelKind, message: impl Into<String>) -> Self {
        Self {
            status: true,
            ..Self::cancelled(channel, message)
        }
    }

    pub fn outcome(&self) -> Outcome {
        if self.status {
            return Outcome::Status;
        }
        match (self.success, &self.error) {
            (true, _) => Outcome::Succeeded,
            (false, Some(_)) => Outcome::Failed,
            (false, None) => Outcome::Cancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        assert_eq!(
            DeliveryResult::succeeded(ChannelKind::Email, "sent").outcome(),
            Outcome::Succeeded
        );
        assert_eq!(
            DeliveryResult::failed(
                ChannelKind::Email,
                NotifyError::MissingDestination {
                    channel: ChannelKind::Email
                }
            )
            .outcome(),
            Outcome::Failed
        );
        assert_eq!(
            DeliveryResult::cancelled(ChannelKind::Teams, "shutting down").outcome(),
            Outcome::Cancelled
        );
        assert_eq!(
            DeliveryResult::status(ChannelKind::Teams, "shutting down").outcome(),
            Outcome::Status
        );
    }
}

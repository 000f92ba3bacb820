//! Microsoft Teams incoming-webhook delivery.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use tripwire_common::config::{ChannelSettings, TeamsConfig};
use tripwire_common::types::{ChannelKind, EventRecord};

use crate::context::DeliveryContext;
use crate::error::NotifyError;
use crate::render::{Branding, MessageCard, teams_card};
use crate::result::DeliveryResult;
use crate::retry::{RetryPolicy, retry_with_delay};
use crate::sender::{MessageSender, clock_time, wait_for_slot};

/// Posts a rendered card to a webhook URL.
#[async_trait]
pub trait WebhookTransport: Send + Sync {
    /// One POST, no retries.
    async fn post(&self, url: &str, card: &MessageCard) -> Result<(), NotifyError>;

    /// Post with the given retry budget, honoring `ctx` between attempts.
    async fn send_with_retry(
        &self,
        ctx: &DeliveryContext,
        url: &str,
        card: &MessageCard,
        policy: RetryPolicy,
    ) -> Result<(), NotifyError> {
        retry_with_delay(ctx, policy, |_| self.post(url, card)).await
    }
}

/// reqwest-backed webhook client.
#[derive(Debug, Clone)]
pub struct TeamsClient {
    http: reqwest::Client,
}

impl TeamsClient {
    /// Build a client whose requests time out after `request_timeout`.
    pub fn new(request_timeout: Duration) -> Result<Self, NotifyError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(concat!("tripwire/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http })
    }
}

#[async_trait]
impl WebhookTransport for TeamsClient {
    async fn post(&self, url: &str, card: &MessageCard) -> Result<(), NotifyError> {
        let response = self.http.post(url).json(card).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(NotifyError::WebhookStatus {
                status: status.as_u16(),
                body,
            });
        }

        Ok(())
    }
}

/// [`MessageSender`] for the Teams channel.
pub struct TeamsSender {
    webhook_url: String,
    settings: ChannelSettings,
    branding: Branding,
    transport: Arc<dyn WebhookTransport>,
}

impl TeamsSender {
    pub fn new(config: &TeamsConfig, branding: Branding, transport: Arc<dyn WebhookTransport>) -> Self {
        Self {
            webhook_url: config.webhook_url.clone(),
            settings: config.settings,
            branding,
            transport,
        }
    }
}

#[async_trait]
impl MessageSender for TeamsSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Teams
    }

    fn settings(&self) -> ChannelSettings {
        self.settings
    }

    async fn send(
        &self,
        ctx: &DeliveryContext,
        record: &EventRecord,
        schedule: Instant,
    ) -> DeliveryResult {
        if self.webhook_url.is_empty() {
            return DeliveryResult::failed(
                ChannelKind::Teams,
                NotifyError::MissingDestination {
                    channel: ChannelKind::Teams,
                },
            );
        }

        let card = teams_card(record, &self.branding);

        if let Err(cancelled) = wait_for_slot(ctx, ChannelKind::Teams, schedule).await {
            return cancelled;
        }

        let policy = RetryPolicy::new(self.settings.retries, self.settings.retry_delay);
        match self
            .transport
            .send_with_retry(ctx, &self.webhook_url, &card, policy)
            .await
        {
            Ok(()) => DeliveryResult::succeeded(
                ChannelKind::Teams,
                format!("Message successfully sent to Microsoft Teams at {}", clock_time()),
            ),
            Err(err) => DeliveryResult::failed(
                ChannelKind::Teams,
                NotifyError::delivery("Microsoft Teams", err),
            ),
        }
    }
}

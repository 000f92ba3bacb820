//! Email channel: renders a record and submits it through a [`MailTransport`].

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;

use tripwire_common::config::{ChannelSettings, EmailConfig};
use tripwire_common::types::{ChannelKind, EventRecord};

use crate::context::DeliveryContext;
use crate::error::NotifyError;
use crate::render::{Branding, email_message};
use crate::result::DeliveryResult;
use crate::retry::{RetryPolicy, retry_with_delay};
use crate::sender::{MessageSender, clock_time, wait_for_slot};
use crate::smtp::MailTransport;

/// [`MessageSender`] for the email channel.
pub struct EmailSender {
    config: EmailConfig,
    branding: Branding,
    transport: Arc<dyn MailTransport>,
}

impl EmailSender {
    pub fn new(config: EmailConfig, branding: Branding, transport: Arc<dyn MailTransport>) -> Self {
        Self {
            config,
            branding,
            transport,
        }
    }

    fn destination(&self) -> String {
        format!("{}:{}", self.config.server, self.config.port)
    }
}

#[async_trait]
impl MessageSender for EmailSender {
    fn channel(&self) -> ChannelKind {
        ChannelKind::Email
    }

    fn settings(&self) -> ChannelSettings {
        self.config.settings
    }

    async fn send(
        &self,
        ctx: &DeliveryContext,
        record: &EventRecord,
        schedule: Instant,
    ) -> DeliveryResult {
        if self.config.server.is_empty() {
            return DeliveryResult::failed(
                ChannelKind::Email,
                NotifyError::MissingDestination {
                    channel: ChannelKind::Email,
                },
            );
        }

        let message = email_message(record, &self.config, &self.branding);

        if let Err(cancelled) = wait_for_slot(ctx, ChannelKind::Email, schedule).await {
            return cancelled;
        }

        let policy = RetryPolicy::new(self.config.settings.retries, self.config.settings.retry_delay);
        let destination = self.destination();
        let sent = retry_with_delay(ctx, policy, |attempt| {
            tracing::debug!(
                record_id = %record.id(),
                attempt,
                allowed = policy.attempts(),
                server = %destination,
                "Submitting email"
            );
            self.transport.send_mail(&self.config, &message)
        })
        .await;

        match sent {
            Ok(()) => DeliveryResult::succeeded(
                ChannelKind::Email,
                format!(
                    "Message successfully sent via SMTP server {destination} at {}",
                    clock_time()
                ),
            ),
            Err(err) => DeliveryResult::failed(ChannelKind::Email, NotifyError::delivery(destination, err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    use chrono::Utc;
    use tokio_util::sync::CancellationToken;
    use tripwire_common::types::{Action, AlertContext};

    use super::*;
    use crate::error::SmtpStage;
    use crate::result::Outcome;

    /// Fails the first `failures` submissions, then accepts.
    struct ScriptedTransport {
        failures: u32,
        calls: AtomicU32,
        messages: Mutex<Vec<String>>,
    }

    impl ScriptedTransport {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                messages: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl MailTransport for ScriptedTransport {
        async fn send_mail(&self, _config: &EmailConfig, message: &str) -> Result<(), NotifyError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.messages.lock().unwrap().push(message.to_string());
            if call <= self.failures {
                Err(NotifyError::smtp(SmtpStage::Connect, "connection refused"))
            } else {
                Ok(())
            }
        }
    }

    fn config(server: &str, retries: u32, retry_delay: Duration) -> EmailConfig {
        EmailConfig {
            server: server.to_string(),
            port: 25,
            client_identity: "tripwire".to_string(),
            sender: "tripwire@example.com".to_string(),
            recipients: vec!["ops@example.com".to_string()],
            credentials: None,
            settings: ChannelSettings {
                rate_limit: Duration::from_secs(3),
                base_timeout: Duration::from_secs(30),
                retries,
                retry_delay,
            },
        }
    }

    fn record() -> EventRecord {
        EventRecord::new(
            AlertContext {
                username: "jdoe".to_string(),
                arrival_time: Utc::now(),
                ..Default::default()
            },
            None,
            Some("x".to_string()),
            Action::Disabled,
            vec![],
        )
        .unwrap()
    }

    fn branding() -> Branding {
        Branding::new("tripwire", "https://example.invalid/tripwire")
    }

    #[tokio::test]
    async fn test_empty_server_never_reaches_transport() {
        let transport = ScriptedTransport::new(0);
        let sender = EmailSender::new(config("", 2, Duration::ZERO), branding(), transport.clone());
        let root = CancellationToken::new();
        let ctx = DeliveryContext::child_of(&root, Duration::from_secs(30));

        let result = sender.send(&ctx, &record(), Instant::now()).await;

        assert_eq!(result.outcome(), Outcome::Failed);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_persistent_failure_exhausts_budget() {
        let transport = ScriptedTransport::new(u32::MAX);
        let sender = EmailSender::new(
            config("smtp.example.com", 2, Duration::from_secs(1)),
            branding(),
            transport.clone(),
        );
        let root = CancellationToken::new();
        let ctx = DeliveryContext::child_of(&root, Duration::from_secs(40));
        let started = Instant::now();

        let result = sender.send(&ctx, &record(), started).await;

        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(result.outcome(), Outcome::Failed);
        let message = result.error.unwrap().to_string();
        assert!(message.contains("smtp.example.com:25"));
        assert!(message.contains("connection refused"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_retry_stops_attempts() {
        let transport = ScriptedTransport::new(1);
        let sender = EmailSender::new(
            config("smtp.example.com", 4, Duration::from_secs(1)),
            branding(),
            transport.clone(),
        );
        let root = CancellationToken::new();
        let ctx = DeliveryContext::child_of(&root, Duration::from_secs(40));

        let result = sender.send(&ctx, &record(), Instant::now()).await;

        assert_eq!(result.outcome(), Outcome::Succeeded);
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);

        let messages = transport.messages.lock().unwrap();
        assert!(messages[0].contains("Subject: tripwire: [step 2 of 3] Username disabled"));
    }
}

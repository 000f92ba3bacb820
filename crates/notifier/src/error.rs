//! Delivery error taxonomy.

use thiserror::Error;
use tripwire_common::types::ChannelKind;

/// Why a delivery context stopped accepting work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Stage of an SMTP session, used to label transport failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SmtpStage {
    Session,
    Connect,
    Greeting,
    Helo,
    Auth,
    MailFrom,
    RcptTo,
    Data,
    Body,
    Quit,
}

impl std::fmt::Display for SmtpStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SmtpStage::Session => write!(f, "session"),
            SmtpStage::Connect => write!(f, "connect"),
            SmtpStage::Greeting => write!(f, "greeting"),
            SmtpStage::Helo => write!(f, "HELO"),
            SmtpStage::Auth => write!(f, "AUTH"),
            SmtpStage::MailFrom => write!(f, "MAIL FROM"),
            SmtpStage::RcptTo => write!(f, "RCPT TO"),
            SmtpStage::Data => write!(f, "DATA"),
            SmtpStage::Body => write!(f, "message body"),
            SmtpStage::Quit => write!(f, "QUIT"),
        }
    }
}

/// Errors produced while delivering a notification.
#[derive(Debug, Clone, Error)]
pub enum NotifyError {
    #[error("{channel} destination not defined, skipping message submission")]
    MissingDestination { channel: ChannelKind },

    #[error("webhook request failed: {0}")]
    Webhook(String),

    #[error("webhook returned HTTP {status}: {body}")]
    WebhookStatus { status: u16, body: String },

    #[error("SMTP {stage} failed: {message}")]
    Smtp { stage: SmtpStage, message: String },

    #[error("all {attempts} attempts failed, last error: {source}")]
    AttemptsExhausted {
        attempts: u32,
        #[source]
        source: Box<NotifyError>,
    },

    #[error("{reason}; aborting before attempt {attempt} of {allowed}{}", last_error_suffix(.last))]
    Aborted {
        attempt: u32,
        allowed: u32,
        reason: ContextError,
        last: Option<Box<NotifyError>>,
    },

    #[error("failed to submit message to {destination}: {source}")]
    Delivery {
        destination: String,
        #[source]
        source: Box<NotifyError>,
    },
}

impl NotifyError {
    pub fn smtp(stage: SmtpStage, message: impl Into<String>) -> Self {
        Self::Smtp {
            stage,
            message: message.into(),
        }
    }

    pub fn delivery(destination: impl Into<String>, source: NotifyError) -> Self {
        Self::Delivery {
            destination: destination.into(),
            source: Box::new(source),
        }
    }
}

impl From<reqwest::Error> for NotifyError {
    fn from(err: reqwest::Error) -> Self {
        Self::Webhook(err.to_string())
    }
}

fn last_error_suffix(last: &Option<Box<NotifyError>>) -> String {
    match last {
        Some(err) => format!(" (last error: {err})"),
        None => String::new(),
    }
}

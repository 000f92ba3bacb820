//! Minimal SMTP client: one plain-text session per message.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use tripwire_common::config::EmailConfig;

use crate::error::{NotifyError, SmtpStage};

/// Submits a fully rendered message to the configured server.
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send_mail(&self, config: &EmailConfig, message: &str) -> Result<(), NotifyError>;
}

/// Direct SMTP client over TCP.
#[derive(Debug, Clone)]
pub struct SmtpClient {
    session_timeout: Duration,
}

impl SmtpClient {
    /// Sessions that take longer than `session_timeout` are abandoned.
    pub fn new(session_timeout: Duration) -> Self {
        Self { session_timeout }
    }
}

#[async_trait]
impl MailTransport for SmtpClient {
    async fn send_mail(&self, config: &EmailConfig, message: &str) -> Result<(), NotifyError> {
        match tokio::time::timeout(self.session_timeout, run_session(config, message)).await {
            Ok(result) => result,
            Err(_) => Err(NotifyError::smtp(
                SmtpStage::Session,
                format!("timed out after {:?}", self.session_timeout),
            )),
        }
    }
}

async fn run_session(config: &EmailConfig, message: &str) -> Result<(), NotifyError> {
    let addr = format!("{}:{}", config.server, config.port);
    let stream = TcpStream::connect(&addr)
        .await
        .map_err(|e| NotifyError::smtp(SmtpStage::Connect, format!("{addr}: {e}")))?;

    let mut session = Session::new(stream);
    session.expect_reply(SmtpStage::Greeting, &[220]).await?;
    session
        .command(SmtpStage::Helo, &format!("HELO {}", config.client_identity), &[250])
        .await?;

    if let Some(creds) = &config.credentials {
        let token = STANDARD.encode(format!("\0{}\0{}", creds.username, creds.password));
        session
            .command(SmtpStage::Auth, &format!("AUTH PLAIN {token}"), &[235])
            .await?;
    }

    session
        .command(SmtpStage::MailFrom, &format!("MAIL FROM:<{}>", config.sender), &[250])
        .await?;
    for recipient in &config.recipients {
        session
            .command(SmtpStage::RcptTo, &format!("RCPT TO:<{recipient}>"), &[250, 251])
            .await?;
    }

    session.command(SmtpStage::Data, "DATA", &[354]).await?;
    session.write_raw(SmtpStage::Body, &encode_body(message)).await?;
    session.expect_reply(SmtpStage::Body, &[250]).await?;

    // The message is already accepted at this point.
    if let Err(err) = session.command(SmtpStage::Quit, "QUIT", &[221]).await {
        tracing::debug!(error = %err, server = %addr, "SMTP server did not acknowledge QUIT");
    }

    Ok(())
}

struct Session {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

impl Session {
    fn new(stream: TcpStream) -> Self {
        let (read, writer) = stream.into_split();
        Self {
            reader: BufReader::new(read),
            writer,
        }
    }

    async fn command(&mut self, stage: SmtpStage, line: &str, accept: &[u16]) -> Result<String, NotifyError> {
        self.write_raw(stage, &format!("{line}\r\n")).await?;
        self.expect_reply(stage, accept).await
    }

    async fn write_raw(&mut self, stage: SmtpStage, data: &str) -> Result<(), NotifyError> {
        self.writer
            .write_all(data.as_bytes())
            .await
            .map_err(|e| NotifyError::smtp(stage, e.to_string()))?;
        self.writer
            .flush()
            .await
            .map_err(|e| NotifyError::smtp(stage, e.to_string()))
    }

    /// Read one (possibly multi-line) reply and check its code.
    async fn expect_reply(&mut self, stage: SmtpStage, accept: &[u16]) -> Result<String, NotifyError> {
        let (code, text) = self.read_reply(stage).await?;
        if accept.contains(&code) {
            Ok(text)
        } else {
            Err(NotifyError::smtp(stage, format!("{code} {text}")))
        }
    }

    async fn read_reply(&mut self, stage: SmtpStage) -> Result<(u16, String), NotifyError> {
        let mut lines = Vec::new();
        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .await
                .map_err(|e| NotifyError::smtp(stage, e.to_string()))?;
            if read == 0 {
                return Err(NotifyError::smtp(stage, "connection closed by server"));
            }

            let line = line.trim_end_matches(['\r', '\n']);
            let code = line
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .ok_or_else(|| NotifyError::smtp(stage, format!("malformed reply: {line:?}")))?;
            let more = line.as_bytes().get(3) == Some(&b'-');
            lines.push(line.get(4..).unwrap_or("").to_string());

            if !more {
                return Ok((code, lines.join(" ")));
            }
        }
    }
}

/// CRLF line endings, dot-stuffing and the terminating `.` line.
fn encode_body(message: &str) -> String {
    let normalized = message.replace("\r\n", "\n");
    let trimmed = normalized.strip_suffix('\n').unwrap_or(&normalized);

    let mut out = String::with_capacity(trimmed.len() + 16);
    for line in trimmed.split('\n') {
        if line.starts_with('.') {
            out.push('.');
        }
        out.push_str(line);
        out.push_str("\r\n");
    }
    out.push_str(".\r\n");
    out
}

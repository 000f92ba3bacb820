use std::str::FromStr;
use std::time::Duration;

use crate::error::AppError;

/// Base per-attempt timeout for Teams webhook delivery.
pub const TEAMS_BASE_TIMEOUT: Duration = Duration::from_secs(10);

/// Base per-attempt timeout for an SMTP session.
pub const EMAIL_BASE_TIMEOUT: Duration = Duration::from_secs(30);

/// Output format for the tracing subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
    Compact,
}

impl FromStr for LogFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            "compact" => Ok(LogFormat::Compact),
            other => Err(AppError::config(format!(
                "LOG_FORMAT must be one of json, pretty, compact (got {other:?})"
            ))),
        }
    }
}

/// Rate limit, timeout and retry budget for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
    /// Minimum spacing between scheduled sends
    pub rate_limit: Duration,
    /// Timeout budget for a single attempt
    pub base_timeout: Duration,
    /// Attempts made after the first one fails
    pub retries: u32,
    /// Pause between attempts
    pub retry_delay: Duration,
}

/// Teams incoming-webhook channel.
#[derive(Debug, Clone)]
pub struct TeamsConfig {
    pub webhook_url: String,
    pub settings: ChannelSettings,
}

/// Optional SMTP AUTH PLAIN credentials.
#[derive(Clone)]
pub struct SmtpCredentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// SMTP email channel.
#[derive(Debug, Clone)]
pub struct EmailConfig {
    pub server: String,
    pub port: u16,
    pub client_identity: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub credentials: Option<SmtpCredentials>,
    pub settings: ChannelSettings,
}

/// Dispatcher queue sizing and monitor cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NotifyConfig {
    /// Capacity of the inbound, per-channel and result queues
    pub queue_depth: usize,
    /// How long shutdown waits on each channel worker
    pub shutdown_timeout: Duration,
    /// Interval between statistics summaries
    pub stats_interval: Duration,
    /// Interval between queue depth reports
    pub queue_interval: Duration,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            queue_depth: 5,
            shutdown_timeout: Duration::from_secs(2),
            stats_interval: Duration::from_secs(300),
            queue_interval: Duration::from_secs(15),
        }
    }
}

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Name used as message title prefix and in branding
    pub app_name: String,

    /// Project URL shown in message trailers
    pub app_url: String,

    /// Tracing output format (default: json)
    pub log_format: LogFormat,

    /// Queue and monitor settings
    pub notify: NotifyConfig,

    /// Teams channel, enabled when `TEAMS_WEBHOOK_URL` is set
    pub teams: Option<TeamsConfig>,

    /// Email channel, enabled when `EMAIL_SERVER` is set
    pub email: Option<EmailConfig>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let notify = NotifyConfig {
            queue_depth: env_parse("NOTIFY_QUEUE_DEPTH", 5)?,
            shutdown_timeout: env_secs("NOTIFY_SHUTDOWN_TIMEOUT_SECS", 2)?,
            stats_interval: env_secs("NOTIFY_STATS_INTERVAL_SECS", 300)?,
            queue_interval: env_secs("NOTIFY_QUEUE_INTERVAL_SECS", 15)?,
        };
        if notify.queue_depth == 0 {
            return Err(AppError::validation("NOTIFY_QUEUE_DEPTH must be at least 1").into());
        }

        let teams = match env_opt("TEAMS_WEBHOOK_URL") {
            Some(webhook_url) => Some(TeamsConfig {
                webhook_url,
                settings: ChannelSettings {
                    rate_limit: env_secs("TEAMS_RATE_LIMIT_SECS", 5)?,
                    base_timeout: TEAMS_BASE_TIMEOUT,
                    retries: env_parse("TEAMS_RETRIES", 2)?,
                    retry_delay: env_secs("TEAMS_RETRY_DELAY_SECS", 5)?,
                },
            }),
            None => None,
        };

        let email = match env_opt("EMAIL_SERVER") {
            Some(server) => {
                let sender = env_opt("EMAIL_SENDER").ok_or_else(|| {
                    AppError::config("EMAIL_SENDER is required when EMAIL_SERVER is set")
                })?;
                let recipients = parse_recipients(&std::env::var("EMAIL_RECIPIENTS").unwrap_or_default());
                if recipients.is_empty() {
                    return Err(AppError::config(
                        "EMAIL_RECIPIENTS is required when EMAIL_SERVER is set",
                    )
                    .into());
                }
                let credentials = match (env_opt("EMAIL_USERNAME"), env_opt("EMAIL_PASSWORD")) {
                    (Some(username), Some(password)) => Some(SmtpCredentials { username, password }),
                    (None, None) => None,
                    _ => {
                        return Err(AppError::config(
                            "EMAIL_USERNAME and EMAIL_PASSWORD must be set together",
                        )
                        .into());
                    }
                };

                Some(EmailConfig {
                    server,
                    port: env_parse("EMAIL_PORT", 25)?,
                    client_identity: std::env::var("EMAIL_CLIENT_IDENTITY")
                        .unwrap_or_else(|_| "tripwire".to_string()),
                    sender,
                    recipients,
                    credentials,
                    settings: ChannelSettings {
                        rate_limit: env_secs("EMAIL_RATE_LIMIT_SECS", 3)?,
                        base_timeout: EMAIL_BASE_TIMEOUT,
                        retries: env_parse("EMAIL_RETRIES", 2)?,
                        retry_delay: env_secs("EMAIL_RETRY_DELAY_SECS", 2)?,
                    },
                })
            }
            None => None,
        };

        Ok(Self {
            app_name: std::env::var("TRIPWIRE_APP_NAME").unwrap_or_else(|_| "tripwire".to_string()),
            app_url: std::env::var("TRIPWIRE_APP_URL")
                .unwrap_or_else(|_| "https://example.invalid/tripwire".to_string()),
            log_format: std::env::var("LOG_FORMAT")
                .unwrap_or_else(|_| "json".to_string())
                .parse()?,
            notify,
            teams,
            email,
        })
    }
}

/// Split a comma separated address list, dropping empty entries.
pub fn parse_recipients(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => Ok(default),
    }
}

fn env_secs(key: &str, default: u64) -> anyhow::Result<Duration> {
    env_parse(key, default).map(Duration::from_secs)
}

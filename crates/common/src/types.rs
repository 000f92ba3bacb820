use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Outcome of one step in the account-disable pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    // Step 2: request handling and disable decisions
    DisableRequested,
    Disabled,
    AlreadyDisabled,
    IgnoredUser,
    IgnoredIp,
    DisableRequestLogFailed,
    DisableFailed,
    DuplicateDisableFailed,
    IgnoreUserCheckFailed,
    IgnoreIpCheckFailed,

    // Step 3: session termination
    SessionsTerminated,
    TerminationSkipped,
    SessionLookupFailed,
    TerminationFailed,
}

impl Action {
    /// Phase label used to group actions in message titles.
    pub fn phase(&self) -> Phase {
        match self {
            Action::DisableRequested
            | Action::Disabled
            | Action::AlreadyDisabled
            | Action::IgnoredUser
            | Action::IgnoredIp
            | Action::DisableRequestLogFailed
            | Action::DisableFailed
            | Action::DuplicateDisableFailed
            | Action::IgnoreUserCheckFailed
            | Action::IgnoreIpCheckFailed => Phase::Step2,
            Action::SessionsTerminated
            | Action::TerminationSkipped
            | Action::SessionLookupFailed
            | Action::TerminationFailed => Phase::Step3,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Action::DisableRequestLogFailed
                | Action::DisableFailed
                | Action::DuplicateDisableFailed
                | Action::IgnoreUserCheckFailed
                | Action::IgnoreIpCheckFailed
                | Action::SessionLookupFailed
                | Action::TerminationFailed
        )
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Action::DisableRequested => write!(f, "Disable user account request received"),
            Action::Disabled => write!(f, "Username disabled"),
            Action::AlreadyDisabled => write!(f, "Username already disabled"),
            Action::IgnoredUser => write!(f, "Username ignored due to ignore username entry"),
            Action::IgnoredIp => write!(f, "Username ignored due to ignore IP entry"),
            Action::DisableRequestLogFailed => write!(f, "Disable user account request log failure"),
            Action::DisableFailed => write!(f, "Username disable failure"),
            Action::DuplicateDisableFailed => write!(f, "Username (duplicate) disable failure"),
            Action::IgnoreUserCheckFailed => write!(f, "Username ignore status check failure"),
            Action::IgnoreIpCheckFailed => write!(f, "IP Address ignore status check failure"),
            Action::SessionsTerminated => write!(f, "User sessions terminated"),
            Action::TerminationSkipped => {
                write!(f, "User sessions termination not enabled; skipped")
            }
            Action::SessionLookupFailed => write!(f, "Failed to lookup user sessions"),
            Action::TerminationFailed => write!(f, "User session termination failure"),
        }
    }
}

/// Display grouping for actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Step2,
    Step3,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Phase::Step2 => write!(f, "step 2 of 3"),
            Phase::Step3 => write!(f, "step 3 of 3"),
        }
    }
}

/// Notification channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    Teams,
    Email,
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Teams => write!(f, "teams"),
            ChannelKind::Email => write!(f, "email"),
        }
    }
}

/// Details of the inbound alert that started the pipeline.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AlertContext {
    pub username: String,
    pub user_ip: String,
    pub payload_sender_ip: String,
    pub arrival_time: DateTime<Utc>,
    pub alert_name: String,
    pub search_id: String,
    pub endpoint_path: String,
    pub http_method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
}

/// Outcome of terminating one user session on the upstream proxy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionTerminationResult {
    pub session_id: String,
    pub ip_address: String,
    pub exit_code: i32,
    #[serde(default)]
    pub stdout: String,
    #[serde(default)]
    pub stderr: String,
    #[serde(default)]
    pub error: Option<String>,
}

/// Raised when a record would carry no displayable summary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("event record for action {action:?} has neither a note nor an error")]
    MissingSummary { action: Action },
}

/// Immutable description of one account-action outcome.
///
/// Construction enforces that at least one of note and error is present.
/// Deserialization goes through the same check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEventRecord")]
pub struct EventRecord {
    id: Uuid,
    alert: AlertContext,
    error: Option<String>,
    note: Option<String>,
    action: Action,
    terminations: Vec<SessionTerminationResult>,
}

impl EventRecord {
    pub fn new(
        alert: AlertContext,
        error: Option<String>,
        note: Option<String>,
        action: Action,
        terminations: Vec<SessionTerminationResult>,
    ) -> Result<Self, RecordError> {
        Self::with_id(Uuid::new_v4(), alert, error, note, action, terminations)
    }

    fn with_id(
        id: Uuid,
        alert: AlertContext,
        error: Option<String>,
        note: Option<String>,
        action: Action,
        terminations: Vec<SessionTerminationResult>,
    ) -> Result<Self, RecordError> {
        let error = non_blank(error);
        let note = non_blank(note);

        if error.is_none() && note.is_none() {
            return Err(RecordError::MissingSummary { action });
        }

        Ok(Self {
            id,
            alert,
            error,
            note,
            action,
            terminations,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn alert(&self) -> &AlertContext {
        &self.alert
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn note(&self) -> Option<&str> {
        self.note.as_deref()
    }

    pub fn action(&self) -> Action {
        self.action
    }

    pub fn terminations(&self) -> &[SessionTerminationResult] {
        &self.terminations
    }
}

/// Wire shape of an [`EventRecord`] before validation.
#[derive(Debug, Deserialize)]
struct RawEventRecord {
    #[serde(default = "Uuid::new_v4")]
    id: Uuid,
    alert: AlertContext,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    note: Option<String>,
    action: Action,
    #[serde(default)]
    terminations: Vec<SessionTerminationResult>,
}

impl TryFrom<RawEventRecord> for EventRecord {
    type Error = RecordError;

    fn try_from(raw: RawEventRecord) -> Result<Self, Self::Error> {
        EventRecord::with_id(
            raw.id,
            raw.alert,
            raw.error,
            raw.note,
            raw.action,
            raw.terminations,
        )
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

//! Message rendering for the Teams and email channels.
//!
//! Rendering never fails a delivery. A field that cannot be displayed is
//! replaced by an inline error note on the message.

use std::fmt::Write as _;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;

use tripwire_common::config::EmailConfig;
use tripwire_common::types::{EventRecord, SessionTerminationResult};

/// Placeholder for template fields the producer left empty.
pub const MISSING_VALUE: &str = "MISSING VALUE - Please file a bug report!";

/// Summary used when a record somehow carries neither note nor error.
pub const MISSING_SUMMARY: &str = "No note or error recorded for this event";

/// Application identity shown in message trailers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Branding {
    pub app_name: String,
    pub app_url: String,
    pub version: String,
}

/// Markup flavour for the branding trailer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrandingFormat {
    Markdown,
    Textile,
}

impl Branding {
    pub fn new(app_name: impl Into<String>, app_url: impl Into<String>) -> Self {
        Self {
            app_name: app_name.into(),
            app_url: app_url.into(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn trailer(&self, format: BrandingFormat) -> String {
        let now = Local::now().to_rfc3339();
        match format {
            BrandingFormat::Markdown => format!(
                "Message generated by [{}]({}) (version {}) at {}",
                self.app_name, self.app_url, self.version, now
            ),
            BrandingFormat::Textile => format!(
                "Message generated by \"{}\":{} (version {}) at {}",
                self.app_name, self.app_url, self.version, now
            ),
        }
    }
}

/// Rejected attempt to add a fact to a card section.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RenderError {
    #[error("fact name is empty")]
    EmptyFactName,

    #[error("fact {0:?} has no values")]
    EmptyFactValues(String),
}

/// `"{app}: [step N of 3] {action}"`
pub fn message_title(app_name: &str, record: &EventRecord) -> String {
    let action = record.action();
    format!("{app_name}: [{}] {action}", action.phase())
}

/// Short body line: the note if present, else the error.
pub fn summary_text(record: &EventRecord) -> String {
    match (record.note(), record.error()) {
        (Some(note), _) => format!("Summary: {note}"),
        (None, Some(err)) => format!("Error: {err}"),
        (None, None) => MISSING_SUMMARY.to_string(),
    }
}

/// One list line per terminated session.
pub fn termination_results_list(results: &[SessionTerminationResult]) -> String {
    let mut out = String::new();
    for result in results {
        let _ = write!(
            out,
            "- {{ SessionID: {:?}, IPAddress: {:?}, ExitCode: {:?}, StdOut: {:?}, StdErr: {:?}, Error: {:?} }}\n\n",
            result.session_id,
            result.ip_address,
            result.exit_code.to_string(),
            result.stdout,
            result.stderr,
            result.error.as_deref().unwrap_or("None"),
        );
    }
    out
}

/// Wrap a value in backticks unless that would break the markup.
pub fn format_as_code(value: &str) -> String {
    if value.is_empty() || value.contains('`') {
        value.to_string()
    } else {
        format!("`{value}`")
    }
}

// ============================================================
// Teams MessageCard
// ============================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Fact {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Section {
    #[serde(skip_serializing_if = "String::is_empty")]
    pub title: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub facts: Vec<Fact>,
    #[serde(rename = "startGroup")]
    pub start_group: bool,
}

impl Section {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            start_group: true,
            ..Default::default()
        }
    }

    pub fn add_fact(&mut self, name: &str, values: &[String]) -> Result<(), RenderError> {
        if name.trim().is_empty() {
            return Err(RenderError::EmptyFactName);
        }
        if values.is_empty() {
            return Err(RenderError::EmptyFactValues(name.to_string()));
        }
        self.facts.push(Fact {
            name: name.to_string(),
            value: values.join(", "),
        });
        Ok(())
    }
}

/// Legacy Office 365 connector card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageCard {
    #[serde(rename = "@type")]
    pub card_type: String,
    #[serde(rename = "@context")]
    pub context: String,
    pub summary: String,
    pub title: String,
    pub text: String,
    pub sections: Vec<Section>,
}

impl MessageCard {
    pub fn new(title: impl Into<String>, text: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            card_type: "MessageCard".to_string(),
            context: "https://schema.org/extensions".to_string(),
            summary: title.clone(),
            title,
            text: text.into(),
            sections: Vec::new(),
        }
    }

    /// Add a code-formatted fact, or note the failure on the card text.
    fn add_fact(&mut self, section: &mut Section, name: &str, values: &[String]) {
        let formatted: Vec<String> = values.iter().map(|v| format_as_code(v)).collect();
        if let Err(err) = section.add_fact(name, &formatted) {
            let note = format!("failed to add fact to section {:?}: {err}", section.title);
            tracing::error!(error = %err, section = %section.title, "Failed to add card fact");
            self.text.push_str("\n\n");
            self.text.push_str(&format_as_code(&note));
        }
    }
}

/// Build the Teams card for one event record.
pub fn teams_card(record: &EventRecord, branding: &Branding) -> MessageCard {
    let alert = record.alert();
    let mut card = MessageCard::new(message_title(&branding.app_name, record), summary_text(record));

    let mut errors = Section::new("## Disable User Request Errors");
    match record.error() {
        Some(err) => card.add_fact(&mut errors, "Error", &[err.to_string()]),
        None => errors.text = "None".to_string(),
    }
    card.sections.push(errors);

    if !record.terminations().is_empty() {
        let mut terminations = Section::new("## Session Termination Results");
        terminations.text = termination_results_list(record.terminations());
        card.sections.push(terminations);
    }

    let mut details = Section::new("## Disable User Request Details");
    card.add_fact(&mut details, "Username", &[alert.username.clone()]);
    card.add_fact(&mut details, "User IP", &[alert.user_ip.clone()]);
    card.add_fact(&mut details, "Alert/Search Name", &[alert.alert_name.clone()]);
    card.add_fact(&mut details, "Alert/Search ID", &[alert.search_id.clone()]);
    card.sections.push(details);

    let mut request = Section::new("## Alert Request Summary");
    card.add_fact(&mut request, "Received at", &[local_arrival_time(record)]);
    card.add_fact(&mut request, "Endpoint path", &[alert.endpoint_path.clone()]);
    card.add_fact(&mut request, "HTTP Method", &[alert.http_method.clone()]);
    card.add_fact(&mut request, "Alert Sender IP", &[alert.payload_sender_ip.clone()]);
    card.sections.push(request);

    // Values are formatted on local copies; the shared record stays untouched.
    let mut headers = Section::new("## Alert Request Headers");
    headers.text = format!("{} alert request headers provided", alert.headers.len());
    for (name, values) in &alert.headers {
        card.add_fact(&mut headers, name, values);
    }
    card.sections.push(headers);

    card.sections.push(Section {
        text: branding.trailer(BrandingFormat::Markdown).replace('\n', "<br>"),
        start_group: true,
        ..Default::default()
    });

    card
}

// ============================================================
// Email
// ============================================================

/// Full RFC 5322 message: headers, blank line, textile body.
pub fn email_message(record: &EventRecord, config: &EmailConfig, branding: &Branding) -> String {
    let subject = message_title(&branding.app_name, record);
    let body = email_body(record, branding);
    format!(
        "To: {}\r\nFrom: {}\r\nSubject: {}\r\n\r\n{}\r\n",
        config.recipients.join(", "),
        config.sender,
        subject,
        body
    )
}

/// Textile body mirroring the sections of the Teams card.
pub fn email_body(record: &EventRecord, branding: &Branding) -> String {
    let alert = record.alert();
    let mut out = String::new();

    let _ = writeln!(out, "**Summary**\n\n<pre>\n{}\n</pre>\n", summary_text(record));

    out.push_str("**Disable User Request Errors**\n\n");
    match record.error() {
        Some(err) => {
            let _ = writeln!(out, "<pre>\n{err}\n</pre>\n");
        }
        None => out.push_str("* None\n\n"),
    }

    if !record.terminations().is_empty() {
        out.push_str("**Session Termination Results**\n\n");
        out.push_str(&termination_results_list(record.terminations()));
    }

    out.push_str("**Disable User Request Details**\n\n");
    table_row(&mut out, "Username", or_missing(&alert.username));
    table_row(&mut out, "User IP", or_missing(&alert.user_ip));
    table_row(&mut out, "Alert/Search Name", or_missing(&alert.alert_name));
    table_row(&mut out, "Alert/Search ID", or_missing(&alert.search_id));
    out.push('\n');

    out.push_str("**Alert Request Summary**\n\n");
    table_row(&mut out, "Received at", &local_arrival_time(record));
    table_row(&mut out, "Endpoint path", &alert.endpoint_path);
    table_row(&mut out, "HTTP Method", &alert.http_method);
    table_row(&mut out, "Alert Sender IP", &alert.payload_sender_ip);
    out.push('\n');

    out.push_str("**Alert Request Headers**\n\n");
    if alert.headers.is_empty() {
        table_row(&mut out, "None", "N/A");
    }
    for (name, values) in &alert.headers {
        table_row(&mut out, name, &values.join(", "));
    }
    out.push('\n');

    out.push_str(&branding.trailer(BrandingFormat::Textile));
    out
}

fn table_row(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(out, "| {name} | {value} |");
}

fn or_missing(value: &str) -> &str {
    if value.is_empty() { MISSING_VALUE } else { value }
}

fn local_arrival_time(record: &EventRecord) -> String {
    record
        .alert()
        .arrival_time
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S %Z")
        .to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::Utc;
    use tripwire_common::config::ChannelSettings;
    use tripwire_common::types::{Action, AlertContext};

    use super::*;

    fn alert_with_headers() -> AlertContext {
        let mut headers = BTreeMap::new();
        headers.insert("User-Agent".to_string(), vec!["Splunk/8.0".to_string()]);
        headers.insert(
            "X-Forwarded-For".to_string(),
            vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
        );
        AlertContext {
            username: "jdoe".to_string(),
            user_ip: "192.0.2.10".to_string(),
            payload_sender_ip: "198.51.100.4".to_string(),
            arrival_time: Utc::now(),
            alert_name: "Repeated login failures".to_string(),
            search_id: String::new(),
            endpoint_path: "/api/v1/users/disable".to_string(),
            http_method: "POST".to_string(),
            headers,
        }
    }

    fn branding() -> Branding {
        Branding::new("tripwire", "https://example.invalid/tripwire")
    }

    fn email_config() -> EmailConfig {
        EmailConfig {
            server: "smtp.example.com".to_string(),
            port: 25,
            client_identity: "tripwire".to_string(),
            sender: "tripwire@example.com".to_string(),
            recipients: vec!["ops@example.com".to_string(), "sec@example.com".to_string()],
            credentials: None,
            settings: ChannelSettings {
                rate_limit: std::time::Duration::from_secs(3),
                base_timeout: std::time::Duration::from_secs(30),
                retries: 2,
                retry_delay: std::time::Duration::from_secs(2),
            },
        }
    }

    #[test]
    fn test_title_uses_phase_label() {
        let record = EventRecord::new(
            alert_with_headers(),
            None,
            Some("disabled".to_string()),
            Action::Disabled,
            vec![],
        )
        .unwrap();
        assert_eq!(
            message_title("tripwire", &record),
            "tripwire: [step 2 of 3] Username disabled"
        );

        let record = EventRecord::new(
            alert_with_headers(),
            None,
            Some("skipped".to_string()),
            Action::TerminationSkipped,
            vec![],
        )
        .unwrap();
        assert_eq!(
            message_title("tripwire", &record),
            "tripwire: [step 3 of 3] User sessions termination not enabled; skipped"
        );
    }

    #[test]
    fn test_summary_prefers_note() {
        let record = EventRecord::new(
            alert_with_headers(),
            Some("boom".to_string()),
            Some("partial disable".to_string()),
            Action::DisableFailed,
            vec![],
        )
        .unwrap();
        assert_eq!(summary_text(&record), "Summary: partial disable");

        let record = EventRecord::new(
            alert_with_headers(),
            Some("boom".to_string()),
            None,
            Action::DisableFailed,
            vec![],
        )
        .unwrap();
        assert_eq!(summary_text(&record), "Error: boom");
    }

    #[test]
    fn test_termination_list_marks_missing_error() {
        let results = vec![SessionTerminationResult {
            session_id: "abc123".to_string(),
            ip_address: "192.0.2.10".to_string(),
            exit_code: 0,
            stdout: "session terminated".to_string(),
            stderr: String::new(),
            error: None,
        }];
        let list = termination_results_list(&results);
        assert!(list.starts_with("- { SessionID: \"abc123\""));
        assert!(list.contains("ExitCode: \"0\""));
        assert!(list.contains("Error: \"None\""));
    }

    #[test]
    fn test_teams_card_sections() {
        let record = EventRecord::new(
            alert_with_headers(),
            None,
            Some("user disabled".to_string()),
            Action::Disabled,
            vec![],
        )
        .unwrap();
        let card = teams_card(&record, &branding());

        let titles: Vec<&str> = card.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "## Disable User Request Errors",
                "## Disable User Request Details",
                "## Alert Request Summary",
                "## Alert Request Headers",
                "",
            ]
        );
        assert_eq!(card.sections[0].text, "None");
        assert_eq!(card.sections[3].text, "2 alert request headers provided");
        assert_eq!(card.sections[3].facts[1].value, "`10.0.0.1`, `10.0.0.2`");
        assert!(card.sections[4].text.contains("tripwire"));

        let json = serde_json::to_value(&card).unwrap();
        assert_eq!(json["@type"], "MessageCard");
        assert_eq!(json["sections"][0]["startGroup"], true);
    }

    #[test]
    fn test_card_formatting_leaves_record_untouched() {
        let record = EventRecord::new(
            alert_with_headers(),
            None,
            Some("user disabled".to_string()),
            Action::Disabled,
            vec![],
        )
        .unwrap();
        let _ = teams_card(&record, &branding());

        assert_eq!(
            record.alert().headers["User-Agent"],
            vec!["Splunk/8.0".to_string()]
        );
        let body = email_body(&record, &branding());
        assert!(body.contains("| User-Agent | Splunk/8.0 |"));
    }

    #[test]
    fn test_empty_header_values_degrade_card_text() {
        let mut alert = alert_with_headers();
        alert.headers.insert("X-Empty".to_string(), vec![]);
        let record =
            EventRecord::new(alert, None, Some("note".to_string()), Action::Disabled, vec![])
                .unwrap();

        let card = teams_card(&record, &branding());
        assert!(card.text.starts_with("Summary: note"));
        assert!(card.text.contains("X-Empty"));
        assert_eq!(card.sections[3].facts.len(), 2);
    }

    #[test]
    fn test_email_message_layout() {
        let record = EventRecord::new(
            alert_with_headers(),
            Some("proxy API returned 500".to_string()),
            None,
            Action::DisableFailed,
            vec![],
        )
        .unwrap();
        let message = email_message(&record, &email_config(), &branding());

        assert!(message.starts_with(
            "To: ops@example.com, sec@example.com\r\nFrom: tripwire@example.com\r\nSubject: tripwire: [step 2 of 3] Username disable failure\r\n\r\n"
        ));
        assert!(message.contains("<pre>\nproxy API returned 500\n</pre>"));
        assert!(message.contains(&format!("| Alert/Search ID | {MISSING_VALUE} |")));
    }

    #[test]
    fn test_email_summary_falls_back_to_error() {
        let record = EventRecord::new(
            alert_with_headers(),
            Some("permission denied".to_string()),
            None,
            Action::TerminationFailed,
            vec![],
        )
        .unwrap();
        let body = email_body(&record, &branding());

        let summary = body
            .split("**Disable User Request Errors**")
            .next()
            .unwrap();
        assert_eq!(summary, "**Summary**\n\n<pre>\nError: permission denied\n</pre>\n\n");
        assert!(!summary.contains(MISSING_VALUE));

        let record = EventRecord::new(
            alert_with_headers(),
            Some("permission denied".to_string()),
            Some("  ".to_string()),
            Action::TerminationFailed,
            vec![],
        )
        .unwrap();
        assert_eq!(summary_text(&record), "Error: permission denied");
    }

    #[test]
    fn test_format_as_code() {
        assert_eq!(format_as_code("value"), "`value`");
        assert_eq!(format_as_code("has ` tick"), "has ` tick");
        assert_eq!(format_as_code(""), "");
    }
}

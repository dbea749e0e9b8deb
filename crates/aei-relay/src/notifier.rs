//! Failure notifications
//!
//! Notifying is best effort: a notifier never reports failure to its caller,
//! so nothing it does can undo a status transition that already committed.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::config::EmailConfig;
use crate::store::{FileRecord, StatusStore};

const SENDGRID_TIMEOUT_SECS: u64 = 30;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, file: &FileRecord, reason: &str);

    /// One digest for every file a coordinator run failed
    async fn notify_batch(&self, failures: &[FileRecord]);
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("SendGrid request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("SendGrid rejected the message: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Logs failures instead of sending mail
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, file: &FileRecord, reason: &str) {
        warn!(
            file_record_id = %file.id,
            filename = %file.filename,
            site_id = file.site_id.as_deref().unwrap_or("-"),
            "File failed: {}",
            reason
        );
    }

    async fn notify_batch(&self, failures: &[FileRecord]) {
        warn!(
            failed = failures.len(),
            files = %failures.iter().map(|f| f.filename.as_str()).collect::<Vec<_>>().join(", "),
            "Ingestion run finished with failures"
        );
    }
}

/// Sends one SendGrid v3 message per recipient in `email_configs`
pub struct EmailNotifier {
    client: Client,
    config: EmailConfig,
    store: Arc<dyn StatusStore>,
}

impl EmailNotifier {
    pub fn new(config: EmailConfig, store: Arc<dyn StatusStore>) -> Result<Self, NotifyError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(SENDGRID_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            config,
            store,
        })
    }

    async fn send(&self, recipient: &str, subject: &str, html: &str) -> Result<(), NotifyError> {
        let url = format!("{}/mail/send", self.config.api_url.trim_end_matches('/'));
        let body = json!({
            "personalizations": [{ "to": [{ "email": recipient }] }],
            "from": { "email": self.config.from_email, "name": self.config.from_name },
            "subject": subject,
            "content": [{ "type": "text/html", "value": html }],
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(NotifyError::Rejected {
                status: status.as_u16(),
                body,
            })
        }
    }

    /// Deliver one message to every configured recipient; returns how many accepted it
    async fn send_to_all(&self, subject: &str, html: &str) -> usize {
        let recipients = match self.store.recipient_emails().await {
            Ok(recipients) => recipients,
            Err(e) => {
                error!(error = %e, "Failed to load notification recipients");
                return 0;
            },
        };

        if recipients.is_empty() {
            warn!(subject, "No recipient emails configured, skipping notification");
            return 0;
        }

        let mut sent = 0;
        for recipient in &recipients {
            match self.send(recipient, subject, html).await {
                Ok(()) => {
                    info!(recipient = %recipient, subject, "Notification sent");
                    sent += 1;
                },
                Err(e) => {
                    error!(recipient = %recipient, error = %e, "Failed to send notification");
                },
            }
        }

        if sent == 0 {
            error!(subject, "Notification reached no recipients");
        }
        sent
    }
}

#[async_trait]
impl Notifier for EmailNotifier {
    #[instrument(skip_all, fields(file_record_id = %file.id))]
    async fn notify(&self, file: &FileRecord, reason: &str) {
        let subject = format!("AEI Relay failure: {}", file.filename);
        let html = failure_email_html(file, reason);
        self.send_to_all(&subject, &html).await;
    }

    #[instrument(skip_all, fields(failed = failures.len()))]
    async fn notify_batch(&self, failures: &[FileRecord]) {
        if failures.is_empty() {
            return;
        }
        let subject = format!("AEI Relay batch failures: {} files failed", failures.len());
        let html = batch_email_html(failures);
        self.send_to_all(&subject, &html).await;
    }
}

/// HTML body with the fields an operator needs to find the file
pub fn failure_email_html(file: &FileRecord, reason: &str) -> String {
    let site_row = file
        .site_id
        .as_deref()
        .map(|site| row("Site ID", site))
        .unwrap_or_default();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: Arial, sans-serif; color: #333;">
<h2 style="color: #dc3545;">AEI Relay processing failure</h2>
<p>A file could not be delivered to the external API.</p>
<table>
{filename}{status}{id}{site}{timestamp}</table>
<h3>Error details</h3>
<pre>{reason}</pre>
<p style="font-size: 12px; color: #6c757d;">Automated notification from AEI Relay. Do not reply.</p>
</body>
</html>
"#,
        filename = row("File name", &file.filename),
        status = row("Status", file.status.as_str()),
        id = row("File record ID", &file.id.to_string()),
        site = site_row,
        timestamp = row("Timestamp", &Utc::now().format("%Y-%m-%d %H:%M:%S UTC").to_string()),
        reason = escape(reason),
    )
}

/// Digest listing every failed file of one run
pub fn batch_email_html(failures: &[FileRecord]) -> String {
    let rows: String = failures
        .iter()
        .map(|file| {
            format!(
                "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td></tr>\n",
                escape(&file.filename),
                file.id,
                escape(file.site_id.as_deref().unwrap_or("-")),
                escape(file.error_message.as_deref().unwrap_or("")),
            )
        })
        .collect();

    format!(
        r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"></head>
<body style="font-family: Arial, sans-serif; color: #333;">
<h2 style="color: #dc3545;">AEI Relay batch failures</h2>
<p>{count} file(s) failed during the ingestion run at {timestamp}.</p>
<table>
<tr><th align="left">File name</th><th align="left">File record ID</th><th align="left">Site ID</th><th align="left">Error</th></tr>
{rows}</table>
<p style="font-size: 12px; color: #6c757d;">Automated notification from AEI Relay. Do not reply.</p>
</body>
</html>
"#,
        count = failures.len(),
        timestamp = Utc::now().format("%Y-%m-%d %H:%M:%S UTC"),
        rows = rows,
    )
}

fn row(label: &str, value: &str) -> String {
    format!("<tr><th align=\"left\">{}</th><td>{}</td></tr>\n", label, escape(value))
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{FileStatus, MemoryStatusStore};
    use uuid::Uuid;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn failed_file() -> FileRecord {
        FileRecord {
            id: Uuid::from_u128(7),
            filename: "202109150646-0001-IHT0001_0022.csv".to_string(),
            source_location: "ftp://reader/uploads/202109150646-0001-IHT0001_0022.csv".to_string(),
            status: FileStatus::Failed,
            site_id: Some("IHT0001".to_string()),
            error_message: Some("record 1: HTTP 500".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn email_config(api_url: String) -> EmailConfig {
        EmailConfig {
            api_key: "SG.test".to_string(),
            from_email: "relay@example.com".to_string(),
            from_name: "AEI Relay".to_string(),
            api_url,
        }
    }

    #[tokio::test]
    async fn test_sends_one_message_per_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v3/mail/send"))
            .and(header("authorization", "Bearer SG.test"))
            .and(body_partial_json(json!({
                "subject": "AEI Relay failure: 202109150646-0001-IHT0001_0022.csv",
                "from": { "email": "relay@example.com" }
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(2)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStatusStore::with_recipients([
            "ops@example.com",
            "oncall@example.com",
        ]));
        let notifier =
            EmailNotifier::new(email_config(format!("{}/v3", server.uri())), store).unwrap();

        notifier.notify(&failed_file(), "record 1: HTTP 500").await;
    }

    #[tokio::test]
    async fn test_no_recipients_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStatusStore::new());
        let notifier = EmailNotifier::new(email_config(server.uri()), store).unwrap();
        notifier.notify(&failed_file(), "boom").await;
    }

    #[tokio::test]
    async fn test_rejection_is_swallowed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_string("bad key"))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStatusStore::with_recipients(["ops@example.com"]));
        let notifier = EmailNotifier::new(email_config(server.uri()), store).unwrap();

        // Must not panic or surface an error
        notifier.notify(&failed_file(), "boom").await;
    }

    #[tokio::test]
    async fn test_batch_is_one_message_per_recipient() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/mail/send"))
            .and(body_partial_json(json!({
                "subject": "AEI Relay batch failures: 2 files failed"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(2)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStatusStore::with_recipients([
            "ops@example.com",
            "oncall@example.com",
        ]));
        let notifier = EmailNotifier::new(email_config(server.uri()), store).unwrap();

        let mut second = failed_file();
        second.id = Uuid::from_u128(8);
        second.filename = "202109150700-0001-IHT0001_0023.csv".to_string();
        notifier.notify_batch(&[failed_file(), second]).await;
    }

    #[tokio::test]
    async fn test_empty_batch_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(202))
            .expect(0)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStatusStore::with_recipients(["ops@example.com"]));
        let notifier = EmailNotifier::new(email_config(server.uri()), store).unwrap();
        notifier.notify_batch(&[]).await;
    }

    #[test]
    fn test_batch_html_lists_every_file() {
        let mut second = failed_file();
        second.filename = "<script>.csv".to_string();
        second.site_id = None;
        let html = batch_email_html(&[failed_file(), second]);
        assert!(html.contains("2 file(s) failed"));
        assert!(html.contains("202109150646-0001-IHT0001_0022.csv"));
        assert!(html.contains("&lt;script&gt;.csv"));
        assert!(html.contains("record 1: HTTP 500"));
    }

    #[test]
    fn test_html_contains_details_and_escapes() {
        let html = failure_email_html(&failed_file(), "expected 15 fields, found <3>");
        assert!(html.contains("202109150646-0001-IHT0001_0022.csv"));
        assert!(html.contains("IHT0001"));
        assert!(html.contains(&Uuid::from_u128(7).to_string()));
        assert!(html.contains("failed"));
        assert!(html.contains("&lt;3&gt;"));
    }
}

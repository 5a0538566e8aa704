use anyhow::{bail, Result};
use serde_json::{json, Value};
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

const SENDGRID_SEND_URL: &str = "https://api.sendgrid.com/v3/mail/send";

/// Upper bound for one SendGrid request.
pub const DEFAULT_EMAIL_TIMEOUT: Duration = Duration::from_secs(10);

/// Sends plain notification emails through SendGrid.
pub struct EmailSender {
    api_key: String,
    url: String,
    http: reqwest::Client,
}

impl EmailSender {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        Self::with_url(api_key, SENDGRID_SEND_URL, DEFAULT_EMAIL_TIMEOUT)
    }

    pub fn with_url(
        api_key: impl Into<String>,
        url: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(timeout)
            .timeout(timeout)
            .build()?;

        Ok(Self {
            api_key: api_key.into(),
            url: url.into(),
            http,
        })
    }

    /// SendGrid v3 request body. The message becomes a single HTML paragraph.
    pub fn payload(from_email: &str, to_email: &str, subject: &str, message: &str) -> Value {
        json!({
            "personalizations": [{"to": [{"email": to_email}]}],
            "from": {"email": from_email},
            "subject": subject,
            "content": [{"type": "text/html", "value": format!("<p>{message}</p>")}],
        })
    }

    /// Send one email. Returns the HTTP status on success (202 Accepted).
    pub async fn send(
        &self,
        from_email: &str,
        to_email: &str,
        subject: &str,
        message: &str,
    ) -> Result<reqwest::StatusCode> {
        let body = Self::payload(from_email, to_email, subject, message);
        let resp = self
            .http
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("SendGrid rejected email: HTTP {status} - {text}");
        }
        debug!("Email sent to {to_email}: {subject}");
        Ok(status)
    }
}

/// Rate gate for periodic monitoring emails.
#[derive(Debug, Clone)]
pub struct EmailMonitor {
    interval: Duration,
    last_sent: Option<Instant>,
}

impl EmailMonitor {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
        }
    }

    pub fn every_minutes(minutes: u64) -> Self {
        Self::new(Duration::from_secs(minutes.max(1) * 60))
    }

    /// True on the first call, then once per interval. Marks the send.
    pub fn due(&mut self, now: Instant) -> bool {
        match self.last_sent {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last_sent = Some(now);
                true
            }
        }
    }
}

/// Sends monitoring emails when email is configured; otherwise only logs.
pub struct AlertManager {
    sender: Option<EmailSender>,
    from: String,
    to: String,
}

impl AlertManager {
    pub fn new(sender: Option<EmailSender>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            sender,
            from: from.into(),
            to: to.into(),
        }
    }

    /// Log-only alert manager.
    pub fn disabled() -> Self {
        Self::new(None, "", "")
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    /// Send an alert. Failures are logged, never returned.
    pub async fn send(&self, subject: &str, message: &str) {
        info!("ALERT: {subject}: {message}");

        let Some(sender) = &self.sender else {
            return;
        };
        if let Err(e) = sender.send(&self.from, &self.to, subject, message).await {
            error!("Email alert failed: {e}");
        }
    }
}

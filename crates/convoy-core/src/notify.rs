//! Best-effort notifications
//!
//! Goals announce transitions, approval codes and failures through a
//! [`Notifier`]. Delivery problems are logged and never abort a goal.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::settings::NotificationSettings;
use crate::{Error, Result};

/// One message to a notification channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub channel: Option<String>,
    pub text: String,
    /// Structured detail rendered by the receiving side
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub fields: BTreeMap<String, String>,
    /// Deliver without alerting channel members
    pub silent: bool,
    /// Wait for delivery instead of sending in the background
    #[serde(skip)]
    pub sending_required: bool,
}

impl Notification {
    pub fn new(channel: Option<String>, text: impl Into<String>) -> Self {
        Self {
            channel,
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    pub fn silent(mut self) -> Self {
        self.silent = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.sending_required = true;
        self
    }
}

pub trait Notifier: Send + Sync {
    /// Deliver `notification`. Only required notifications report delivery
    /// failures; background sends return as soon as they are queued.
    fn notify(&self, notification: &Notification) -> Result<()>;

    /// Whether notifications leave this process. Approval codes need a
    /// notifier that does.
    fn delivers(&self) -> bool {
        true
    }

    /// Wait up to `timeout` for background sends to finish.
    fn flush(&self, _timeout: Duration) {}
}

/// Send `notification`, logging instead of failing.
pub fn notify_best_effort(notifier: &dyn Notifier, notification: &Notification) {
    if let Err(e) = notifier.notify(notification) {
        tracing::warn!(
            channel = ?notification.channel,
            error = %e,
            "Notification delivery failed"
        );
    }
}

/// Build the notifier configured in `[notifications]`.
pub fn from_settings(settings: &NotificationSettings) -> Result<Box<dyn Notifier>> {
    match &settings.webhook_url {
        Some(url) if !url.trim().is_empty() => Ok(Box::new(WebhookNotifier::new(
            url,
            Duration::from_secs(settings.timeout_secs),
        )?)),
        _ => Ok(Box::new(LogNotifier)),
    }
}

/// Writes notifications to the log; used when no webhook is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        tracing::info!(
            channel = notification.channel.as_deref().unwrap_or("-"),
            fields = ?notification.fields,
            "{}",
            notification.text
        );
        Ok(())
    }

    fn delivers(&self) -> bool {
        false
    }
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    notification: &'a Notification,
}

/// Posts notifications as JSON to a webhook endpoint.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: reqwest::blocking::Client,
    url: String,
    pending: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl WebhookNotifier {
    pub fn new(url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::config(format!("Failed to build webhook client: {e}")))?;
        Ok(Self {
            client,
            url: url.to_string(),
            pending: Arc::default(),
        })
    }
}

fn post(client: &reqwest::blocking::Client, url: &str, body: String) -> Result<()> {
    let failed = |message: String, status: Option<i32>| Error::Exec {
        message,
        status,
        stderr: String::new(),
    };
    let response = client
        .post(url)
        .header("Content-Type", "application/json")
        .body(body)
        .send()
        .map_err(|e| failed(format!("Webhook request failed: {e}"), None))?;
    let status = response.status();
    if !status.is_success() {
        let body = response.text().unwrap_or_default();
        return Err(failed(
            format!("Webhook returned {status}: {body}"),
            Some(i32::from(status.as_u16())),
        ));
    }
    Ok(())
}

impl Notifier for WebhookNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        let body = serde_json::to_string(&WebhookPayload {
            timestamp: Utc::now(),
            notification,
        })?;

        if notification.sending_required {
            return post(&self.client, &self.url, body);
        }

        let client = self.client.clone();
        let url = self.url.clone();
        let handle = std::thread::spawn(move || {
            if let Err(e) = post(&client, &url, body) {
                tracing::warn!(error = %e, "Webhook delivery failed (non-blocking)");
            }
        });
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        pending.retain(|send| !send.is_finished());
        pending.push(handle);
        Ok(())
    }

    fn flush(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        let pending = std::mem::take(&mut *self.pending.lock().unwrap_or_else(PoisonError::into_inner));
        let mut abandoned = 0;
        for send in pending {
            while !send.is_finished() && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(10));
            }
            if send.is_finished() {
                let _ = send.join();
            } else {
                abandoned += 1;
            }
        }
        if abandoned > 0 {
            tracing::warn!(abandoned, "Webhook deliveries still pending at exit");
        }
    }
}

/// Keeps notifications in memory instead of delivering them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, notification: &Notification) -> Result<()> {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        Ok(())
    }
}

// Notifiers: run summaries pushed to external channels

use reqwest::blocking::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::WebhookConfig;
use crate::model::RunStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Everything a notifier may report about one bridge pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub bridge_name: String,
    pub vault_name: String,
    pub timestamp: String,
    pub run: RunStats,
    pub source_missing: bool,
    pub vault_missing: bool,
}

impl NotificationPayload {
    pub fn has_errors(&self) -> bool {
        self.run.is_errorish() || self.source_missing || self.vault_missing
    }

    pub fn severity(&self) -> Severity {
        if self.has_errors() {
            Severity::Error
        } else if self.run.no_text > 0 {
            Severity::Warning
        } else {
            Severity::Info
        }
    }

    pub fn error_messages(&self) -> Vec<&'static str> {
        let mut errors = Vec::new();
        if self.run.tool_missing > 0 {
            errors.push("recognition tool not found");
        }
        if self.run.tool_failed > 0 {
            errors.push("recognition tool failed");
        }
        if self.run.ledger_errors > 0 {
            errors.push("task ledger unavailable");
        }
        if self.source_missing {
            errors.push("Source folder is missing");
        }
        if self.vault_missing {
            errors.push("Vault is missing");
        }
        errors
    }
}

/// Plain-text summary shared by every notifier.
pub fn format_message(payload: &NotificationPayload) -> String {
    let outcome = if payload.has_errors() { "ERROR" } else { "OK" };
    let mut lines = vec![format!("Inkbridge: {} - [{}]", payload.vault_name, outcome), String::new()];

    let errors = payload.error_messages();
    match errors.as_slice() {
        [] => {}
        [only] => {
            lines.push(format!("Error: {}", only));
            lines.push(String::new());
        }
        many => {
            lines.push("Errors:".to_string());
            lines.extend(many.iter().map(|e| format!("- {}", e)));
            lines.push(String::new());
        }
    }

    let run = &payload.run;
    lines.push(format!("Notes: {}", run.notes_found));
    lines.push(format!("Converted: {}", run.converted));
    lines.push(format!("Skipped: {}", run.skipped));
    lines.push(format!("No text: {}", run.no_text));
    lines.join("\n")
}

#[derive(Debug, Clone, Copy)]
pub struct NotifyContext<'a> {
    pub bridge_name: &'a str,
}

/// Sends a notification. Never fails; returns whether delivery succeeded.
pub trait Notifier {
    fn name(&self) -> &str;

    fn send(&self, payload: &NotificationPayload, ctx: &NotifyContext<'_>) -> bool;
}

#[derive(Debug, Default)]
pub struct NoopNotifier;

impl Notifier for NoopNotifier {
    fn name(&self) -> &str {
        "noop"
    }

    fn send(&self, _: &NotificationPayload, _: &NotifyContext<'_>) -> bool {
        true
    }
}

#[derive(Debug, Serialize)]
struct WebhookBody<'a> {
    bridge: &'a str,
    timestamp: &'a str,
    severity: Severity,
    notes_found: i64,
    converted: i64,
    skipped: i64,
    no_text: i64,
    tool_missing: i64,
    tool_failed: i64,
    source_missing: bool,
    vault_missing: bool,
    title: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    topic: Option<&'a str>,
}

/// JSON POST to a configured URL; success is any 2xx.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    url: Option<String>,
    topic: Option<String>,
    timeout: Duration,
}

impl WebhookNotifier {
    pub fn new(config: &WebhookConfig) -> Self {
        let clean = |v: &Option<String>| v.as_ref().map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            url: clean(&config.url),
            topic: clean(&config.topic),
            timeout: Duration::from_secs(config.timeout_secs.max(1)),
        }
    }
}

impl Notifier for WebhookNotifier {
    fn name(&self) -> &str {
        "webhook"
    }

    fn send(&self, payload: &NotificationPayload, ctx: &NotifyContext<'_>) -> bool {
        let Some(url) = self.url.as_deref() else {
            debug!(bridge = ctx.bridge_name, "No webhook URL configured, skipping notification");
            return false;
        };

        let run = &payload.run;
        let body = WebhookBody {
            bridge: &payload.bridge_name,
            timestamp: &payload.timestamp,
            severity: payload.severity(),
            notes_found: run.notes_found,
            converted: run.converted,
            skipped: run.skipped,
            no_text: run.no_text,
            tool_missing: run.tool_missing,
            tool_failed: run.tool_failed,
            source_missing: payload.source_missing,
            vault_missing: payload.vault_missing,
            title: format!("Inkbridge: {}", payload.bridge_name),
            message: format_message(payload),
            topic: self.topic.as_deref(),
        };

        let client = match Client::builder().timeout(self.timeout).build() {
            Ok(c) => c,
            Err(e) => {
                warn!(bridge = ctx.bridge_name, error = %e, "Failed to build HTTP client for webhook");
                return false;
            }
        };

        match client.post(url).json(&body).send() {
            Ok(resp) if resp.status().is_success() => {
                info!(bridge = ctx.bridge_name, status = resp.status().as_u16(), "Notification sent");
                true
            }
            Ok(resp) => {
                warn!(bridge = ctx.bridge_name, status = resp.status().as_u16(), "Webhook returned non-2xx status");
                false
            }
            Err(e) => {
                warn!(bridge = ctx.bridge_name, error = %e, "Failed to send notification");
                false
            }
        }
    }
}

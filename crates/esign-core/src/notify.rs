//! Outbound notifications (webhooks, KYC triggers, email) as a seam

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tracing::info;

/// Trigger names delivered to business webhooks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationEvent {
    DocumentSent,
    DocumentSigned,
    DocumentDeclined,
    DocumentCompleted,
    DocumentExpired,
    /// Document was flagged to start investor onboarding on completion
    KycRequested,
}

impl NotificationEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            NotificationEvent::DocumentSent => "document_sent",
            NotificationEvent::DocumentSigned => "document_signed",
            NotificationEvent::DocumentDeclined => "document_declined",
            NotificationEvent::DocumentCompleted => "document_completed",
            NotificationEvent::DocumentExpired => "document_expired",
            NotificationEvent::KycRequested => "kyc_requested",
        }
    }
}

/// Fire-and-forget delivery; failures are reported, never retried here
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, event: NotificationEvent, payload: Value) -> Result<(), String>;
}

/// Writes notifications to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, event: NotificationEvent, payload: Value) -> Result<(), String> {
        info!(event = event.as_str(), %payload, "Notification");
        Ok(())
    }
}

/// Records notifications in memory
#[derive(Default)]
pub struct CollectingNotifier {
    sent: Mutex<Vec<(NotificationEvent, Value)>>,
}

impl CollectingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(NotificationEvent, Value)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.sent().into_iter().map(|(event, _)| event).collect()
    }
}

#[async_trait]
impl Notifier for CollectingNotifier {
    async fn notify(&self, event: NotificationEvent, payload: Value) -> Result<(), String> {
        self.sent
            .lock()
            .map_err(|_| "notifier lock poisoned".to_string())?
            .push((event, payload));
        Ok(())
    }
}

//! Post-commit signing events and their subscribers
//!
//! Transitions publish after their commit succeeds. Subscribers run
//! independently: the completion worker finalizes and certifies completed
//! documents, the notification relay forwards triggers to the notifier.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::notify::{NotificationEvent, Notifier};
use crate::service::SigningService;
use crate::store::DocumentStore;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SigningEvent {
    DocumentSent {
        document_id: String,
    },
    DocumentSigned {
        document_id: String,
        recipient_email: String,
    },
    DocumentDeclined {
        document_id: String,
        recipient_email: String,
        /// A required recipient declined, so the document is closed
        document_declined: bool,
    },
    DocumentCompleted {
        document_id: String,
        completed_at: DateTime<Utc>,
    },
    DocumentExpired {
        document_id: String,
    },
}

impl SigningEvent {
    pub fn document_id(&self) -> &str {
        match self {
            SigningEvent::DocumentSent { document_id }
            | SigningEvent::DocumentSigned { document_id, .. }
            | SigningEvent::DocumentDeclined { document_id, .. }
            | SigningEvent::DocumentCompleted { document_id, .. }
            | SigningEvent::DocumentExpired { document_id } => document_id,
        }
    }

    fn notification(&self) -> NotificationEvent {
        match self {
            SigningEvent::DocumentSent { .. } => NotificationEvent::DocumentSent,
            SigningEvent::DocumentSigned { .. } => NotificationEvent::DocumentSigned,
            SigningEvent::DocumentDeclined { .. } => NotificationEvent::DocumentDeclined,
            SigningEvent::DocumentCompleted { .. } => NotificationEvent::DocumentCompleted,
            SigningEvent::DocumentExpired { .. } => NotificationEvent::DocumentExpired,
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SigningEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, event: SigningEvent) {
        if self.tx.send(event).is_err() {
            debug!("No subscribers for signing event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SigningEvent> {
        self.tx.subscribe()
    }
}

/// Receive the next event, skipping over lag. `None` once the bus is gone.
async fn next_event(rx: &mut broadcast::Receiver<SigningEvent>, worker: &str) -> Option<SigningEvent> {
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!(worker, skipped = n, "Event subscriber lagged");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!(worker, "Event bus closed");
                return None;
            }
        }
    }
}

/// Renders, seals and certifies documents as they complete
pub struct CompletionWorker;

impl CompletionWorker {
    pub fn spawn(service: SigningService) -> JoinHandle<()> {
        let mut rx = service.events().subscribe();
        tokio::spawn(async move {
            while let Some(event) = next_event(&mut rx, "completion").await {
                let SigningEvent::DocumentCompleted { document_id, .. } = event else {
                    continue;
                };
                match service.generate_certificate(&document_id).await {
                    Ok(certificate) => info!(
                        document_id = %document_id,
                        certificate_id = %certificate.record.certificate_id,
                        "Completed document certified"
                    ),
                    // Retryable on demand through render/generate
                    Err(e) => warn!(document_id = %document_id, error = %e, "Completion finalization failed"),
                }
            }
        })
    }
}

/// Forwards signing events to the notifier
pub struct NotificationRelay;

impl NotificationRelay {
    pub fn spawn(
        bus: &EventBus,
        notifier: Arc<dyn Notifier>,
        store: Arc<dyn DocumentStore>,
    ) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            while let Some(event) = next_event(&mut rx, "notifications").await {
                if let Some(payload) = event_payload(&event) {
                    deliver(notifier.as_ref(), event.notification(), payload).await;
                }

                if let SigningEvent::DocumentCompleted { document_id, .. } = &event {
                    match store.load(document_id).await {
                        Ok(document) if document.metadata.flags.trigger_kyc_on_completion => {
                            let payload = json!({
                                "document_id": document.id,
                                "team_id": document.team_id,
                                "signers": document
                                    .recipients
                                    .iter()
                                    .filter(|r| r.is_signed())
                                    .map(|r| json!({ "name": r.name, "email": r.email }))
                                    .collect::<Vec<_>>(),
                            });
                            deliver(notifier.as_ref(), NotificationEvent::KycRequested, payload)
                                .await;
                        }
                        Ok(_) => {}
                        Err(e) => warn!(document_id = %document_id, error = %e, "Could not load completed document"),
                    }
                }
            }
        })
    }
}

/// Notification body for an event; `None` (logged) when it cannot be encoded
fn event_payload(event: &SigningEvent) -> Option<serde_json::Value> {
    match serde_json::to_value(event) {
        Ok(payload) => Some(payload),
        Err(e) => {
            warn!(
                document_id = %event.document_id(),
                event = event.notification().as_str(),
                error = %e,
                "Could not encode event payload, notification skipped"
            );
            None
        }
    }
}

async fn deliver(notifier: &dyn Notifier, event: NotificationEvent, payload: serde_json::Value) {
    if let Err(e) = notifier.notify(event, payload).await {
        warn!(event = event.as_str(), error = %e, "Notification failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new();
        bus.publish(SigningEvent::DocumentSent {
            document_id: "doc-1".to_string(),
        });
    }

    #[tokio::test]
    async fn test_subscribers_receive_in_order() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();
        bus.publish(SigningEvent::DocumentSent {
            document_id: "doc-1".to_string(),
        });
        bus.publish(SigningEvent::DocumentExpired {
            document_id: "doc-1".to_string(),
        });

        let first = next_event(&mut rx, "test").await.unwrap();
        let second = next_event(&mut rx, "test").await.unwrap();
        assert_eq!(first.notification(), NotificationEvent::DocumentSent);
        assert_eq!(second.document_id(), "doc-1");
        assert_eq!(second.notification(), NotificationEvent::DocumentExpired);
    }

    #[test]
    fn test_event_payload_shape() {
        let event = SigningEvent::DocumentDeclined {
            document_id: "doc-1".to_string(),
            recipient_email: "bob@example.com".to_string(),
            document_declined: true,
        };
        let value = event_payload(&event).unwrap();
        assert_eq!(value["type"], "document_declined");
        assert_eq!(value["document_id"], "doc-1");
        assert_eq!(value["recipient_email"], "bob@example.com");
    }
}

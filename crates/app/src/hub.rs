use serde::Serialize;
use tokio::sync::broadcast;
use tracing::warn;

use recdesk_core::{AutosaveEvent, Trigger};

/// Out-of-band notification pushed to the UI shell.
#[derive(Debug, Clone, Serialize)]
pub struct UpdateNotice {
    pub method: &'static str,
    pub record_id: String,
    pub trigger: Trigger,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl UpdateNotice {
    pub fn from_autosave(record_id: &str, event: AutosaveEvent) -> Self {
        Self {
            method: if event.success {
                "autosave.saved"
            } else {
                "autosave.save_failed"
            },
            record_id: record_id.to_string(),
            trigger: event.trigger,
            error: event.error,
        }
    }
}

/// Fan-out point for update notifications.
///
/// Owns its subscriber table explicitly: one hub is constructed in `main`
/// and handed to everything that publishes or listens, instead of living in
/// module-level shared state.
#[derive(Clone)]
pub struct UpdateHub {
    sender: broadcast::Sender<UpdateNotice>,
}

impl UpdateHub {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(128);
        Self { sender }
    }

    pub fn publish(&self, notice: UpdateNotice) {
        if let Err(err) = self.sender.send(notice) {
            // Nobody subscribed yet; worth a note but not an error.
            warn!(error = %err, "no subscriber for update notice");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<UpdateNotice> {
        self.sender.subscribe()
    }
}

impl Default for UpdateHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_to_subscribers() {
        let hub = UpdateHub::new();
        let mut rx = hub.subscribe();

        let event = AutosaveEvent {
            trigger: Trigger::Auto,
            success: true,
            error: None,
        };
        hub.publish(UpdateNotice::from_autosave("rec-1", event));

        let notice = rx.recv().await.expect("notice");
        assert_eq!(notice.method, "autosave.saved");
        assert_eq!(notice.record_id, "rec-1");
    }

    #[tokio::test]
    async fn failure_events_map_to_save_failed() {
        let hub = UpdateHub::new();
        let mut rx = hub.subscribe();

        let event = AutosaveEvent {
            trigger: Trigger::Manual,
            success: false,
            error: Some("disk full".to_string()),
        };
        hub.publish(UpdateNotice::from_autosave("rec-2", event));

        let notice = rx.recv().await.expect("notice");
        assert_eq!(notice.method, "autosave.save_failed");
        assert_eq!(notice.error.as_deref(), Some("disk full"));
    }
}

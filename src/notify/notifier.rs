use super::{Audience, ChangeEvent, Dispatcher, EventKind, Notification, NotificationStore, Owner};
use crate::error::EntityKind;
use serde_json::Value;
use std::sync::Arc;
use tracing::warn;

/// Publishes change events and records user-facing notifications.
///
/// Persistence failures are logged and swallowed: the state mutation that
/// triggered the notification has already committed.
pub struct Notifier {
    dispatcher: Arc<Dispatcher>,
    store: Option<Arc<NotificationStore>>,
}

impl Notifier {
    pub fn new(dispatcher: Arc<Dispatcher>, store: Option<Arc<NotificationStore>>) -> Self {
        Self { dispatcher, store }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn store(&self) -> Option<&Arc<NotificationStore>> {
        self.store.as_ref()
    }

    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.dispatcher.publish(event)
    }

    /// Append a notification row for `recipient` and push it live.
    pub fn notify(
        &self,
        recipient: &Owner,
        title: &str,
        message: &str,
        type_tag: &str,
        payload: Value,
    ) -> Option<Notification> {
        let store = self.store.as_ref()?;
        let (recipient_id, audience) = match recipient {
            Owner::Requester(id) => (id.as_str(), Audience::requester(id)),
            Owner::Agent(id) => (id.as_str(), Audience::agent(id)),
        };

        match store.append(recipient_id, title, message, type_tag, payload) {
            Ok(notification) => {
                let payload = serde_json::to_value(&notification).unwrap_or(Value::Null);
                self.dispatcher.publish(ChangeEvent::new(
                    EventKind::NotificationCreated,
                    EntityKind::Notification,
                    &notification.id,
                    audience,
                    payload,
                ));
                Some(notification)
            }
            Err(e) => {
                warn!(
                    recipient_id = %recipient_id,
                    type_tag = %type_tag,
                    error = %e,
                    "Failed to record notification"
                );
                None
            }
        }
    }
}

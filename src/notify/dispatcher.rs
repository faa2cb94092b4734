use super::{ChangeEvent, SubscriptionFilter};
use crate::agent::AgentRegistry;
use futures::Stream;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

/// Delivery failures seen by a subscriber
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriberError {
    /// Events were dropped; re-read authoritative state before continuing
    #[error("subscriber lagged, {0} events dropped")]
    Lagged(u64),
    #[error("event channel closed")]
    Closed,
}

/// Notification dispatcher: publishes change events to live subscribers.
///
/// Delivery is best-effort and never blocks the mutator. Each subscriber
/// owns its own receive queue; a dropped event is not retried, subscribers
/// heal by re-reading the stores when they see `Lagged`.
pub struct Dispatcher {
    tx: broadcast::Sender<ChangeEvent>,
    /// Presence lookups for broadcast-to-online-agents events
    presence: Arc<AgentRegistry>,
    published: AtomicU64,
}

impl Dispatcher {
    pub fn new(capacity: usize, presence: Arc<AgentRegistry>) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            presence,
            published: AtomicU64::new(0),
        }
    }

    /// Publish an event. Returns the number of live receivers.
    pub fn publish(&self, event: ChangeEvent) -> usize {
        self.published.fetch_add(1, Ordering::Relaxed);

        debug!(
            event_id = %event.id,
            kind = ?event.kind,
            entity_id = %event.entity_id,
            "Publishing change event"
        );

        // No subscribers is fine
        self.tx.send(event).unwrap_or(0)
    }

    /// Open a subscription scoped by `filter`
    pub fn subscribe(&self, filter: SubscriptionFilter) -> Subscriber {
        Subscriber {
            rx: self.tx.subscribe(),
            filter,
            presence: Arc::clone(&self.presence),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

/// One observer's typed event channel
pub struct Subscriber {
    rx: broadcast::Receiver<ChangeEvent>,
    filter: SubscriptionFilter,
    presence: Arc<AgentRegistry>,
}

impl Subscriber {
    pub fn filter(&self) -> &SubscriptionFilter {
        &self.filter
    }

    fn wants(&self, event: &ChangeEvent) -> bool {
        self.filter
            .matches(event, |agent_id| self.presence.is_online(agent_id))
    }

    /// Wait for the next event matching the filter
    pub async fn recv(&mut self) -> Result<ChangeEvent, SubscriberError> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.wants(&event) => return Ok(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped = skipped, "Subscriber lagged, resync required");
                    return Err(SubscriberError::Lagged(skipped));
                }
                Err(broadcast::error::RecvError::Closed) => return Err(SubscriberError::Closed),
            }
        }
    }

    /// Next queued matching event without waiting
    pub fn try_recv(&mut self) -> Result<Option<ChangeEvent>, SubscriberError> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.wants(&event) => return Ok(Some(event)),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    return Err(SubscriberError::Lagged(skipped))
                }
                Err(broadcast::error::TryRecvError::Closed) => return Err(SubscriberError::Closed),
            }
        }
    }

    /// Convert into a `Stream` of matching events
    pub fn into_stream(
        self,
    ) -> impl Stream<Item = Result<ChangeEvent, SubscriberError>> + Send + 'static {
        let Subscriber {
            rx,
            filter,
            presence,
        } = self;

        BroadcastStream::new(rx).filter_map(move |item| match item {
            Ok(event) => {
                if filter.matches(&event, |agent_id| presence.is_online(agent_id)) {
                    Some(Ok(event))
                } else {
                    None
                }
            }
            Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                Some(Err(SubscriberError::Lagged(skipped)))
            }
        })
    }
}

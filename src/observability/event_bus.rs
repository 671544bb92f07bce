//! Tokio broadcast event bus for filter decisions.

use crate::models::{DedupEvent, DedupEventKind};
use std::sync::OnceLock;
use tokio::sync::broadcast;

const DEFAULT_EVENT_BUS_CAPACITY: usize = 1024;

/// Central event bus for broadcasting dedup events.
///
/// Publishing never blocks the pipeline: with no subscribers the event is
/// dropped, and slow subscribers lag instead of applying backpressure.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DedupEvent>,
}

/// Filtered receiver that yields events matching a predicate.
pub struct FilteredReceiver<F> {
    receiver: broadcast::Receiver<DedupEvent>,
    predicate: F,
}

impl EventBus {
    /// Creates a new event bus with the given buffer capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers (best effort).
    pub fn publish(&self, event: DedupEvent) {
        metrics::counter!("deltafetch_event_bus_publish_total", "kind" => event.kind.as_str())
            .increment(1);
        if self.sender.send(event).is_err() {
            metrics::counter!("deltafetch_event_bus_publish_failed_total").increment(1);
        }
    }

    /// Returns the number of active subscribers.
    #[must_use]
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Subscribes to the event bus.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<DedupEvent> {
        metrics::counter!("deltafetch_event_bus_subscriptions_total").increment(1);
        self.sender.subscribe()
    }

    /// Subscribes with a predicate to filter events by kind or job.
    #[must_use]
    pub fn subscribe_filtered<F>(&self, predicate: F) -> FilteredReceiver<F>
    where
        F: Fn(&DedupEvent) -> bool,
    {
        FilteredReceiver {
            receiver: self.subscribe(),
            predicate,
        }
    }

    /// Subscribes to events of one kind.
    #[must_use]
    pub fn subscribe_kind(
        &self,
        kind: DedupEventKind,
    ) -> FilteredReceiver<impl Fn(&DedupEvent) -> bool> {
        self.subscribe_filtered(move |event| event.kind == kind)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUS_CAPACITY)
    }
}

impl<F> FilteredReceiver<F>
where
    F: Fn(&DedupEvent) -> bool,
{
    /// Receives the next event that matches the predicate.
    ///
    /// # Errors
    ///
    /// Returns [`broadcast::error::RecvError::Closed`] once every sender is gone.
    pub async fn recv(&mut self) -> Result<DedupEvent, broadcast::error::RecvError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if (self.predicate)(&event) {
                        return Ok(event);
                    }
                },
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    metrics::counter!("deltafetch_event_bus_lagged_total").increment(skipped);
                },
                Err(err) => return Err(err),
            }
        }
    }

    /// Returns the next buffered matching event without waiting.
    ///
    /// Returns `None` once the buffer holds no further match.
    pub fn try_recv(&mut self) -> Option<DedupEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if (self.predicate)(&event) => return Some(event),
                Ok(_) => {},
                Err(broadcast::error::TryRecvError::Lagged(skipped)) => {
                    metrics::counter!("deltafetch_event_bus_lagged_total").increment(skipped);
                },
                Err(_) => return None,
            }
        }
    }
}

static GLOBAL_EVENT_BUS: OnceLock<EventBus> = OnceLock::new();

/// Returns the global event bus, initializing it on first use.
#[must_use]
pub fn global_event_bus() -> &'static EventBus {
    GLOBAL_EVENT_BUS.get_or_init(EventBus::default)
}

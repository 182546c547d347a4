use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::error::Result;
use crate::payloads::{Event, EventPayload};
use crate::topics::EventTopic;

/// Default per-subscriber queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

type BoxedHandler =
    Arc<dyn Fn(Arc<Event>) -> Pin<Box<dyn Future<Output = Result<()>> + Send>> + Send + Sync>;

struct SubscriberSlot {
    id: u64,
    label: String,
    tx: mpsc::Sender<Arc<Event>>,
}

struct BusInner {
    subscribers: Mutex<HashMap<EventTopic, Vec<SubscriberSlot>>>,
    next_sub_id: AtomicU64,
    running: AtomicBool,
    dropped: AtomicU64,
    queue_capacity: usize,
}

/// Handle to a registered subscription. Pass back to
/// [`EventBus::unsubscribe`] to remove it; removal also cancels the
/// delivery task so no handler runs afterwards.
pub struct Subscription {
    pub topic: EventTopic,
    id: u64,
    task: JoinHandle<()>,
}

/// Topic-addressed publish/subscribe mesh.
///
/// `emit` is synchronous and callable from any thread: delivery always goes
/// through a per-subscriber bounded queue drained by a task on the runtime,
/// so background-thread producers (audio callback, vendor SDK callbacks)
/// use the same path as scheduler-side emitters. A slow subscriber never
/// backpressures an emitter; its queue overflows instead, and every drop is
/// counted and logged.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_queue_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_queue_capacity(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                subscribers: Mutex::new(HashMap::new()),
                next_sub_id: AtomicU64::new(1),
                running: AtomicBool::new(true),
                dropped: AtomicU64::new(0),
                queue_capacity,
            }),
        }
    }

    /// Register an async handler for `topic`.
    ///
    /// Handler errors are logged and never abort the bus; other subscribers
    /// are unaffected. Must be called from within the runtime.
    pub fn subscribe<F, Fut>(&self, topic: EventTopic, label: &str, handler: F) -> Subscription
    where
        F: Fn(Arc<Event>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let handler: BoxedHandler = Arc::new(move |event| Box::pin(handler(event)));
        let (tx, mut rx) = mpsc::channel::<Arc<Event>>(self.inner.queue_capacity);
        let id = self.inner.next_sub_id.fetch_add(1, Ordering::Relaxed);
        let task_label = label.to_string();

        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let topic = event.topic;
                if let Err(e) = (handler)(event).await {
                    error!(subscriber = %task_label, %topic, error = %e, "event handler failed");
                }
            }
        });

        let slot = SubscriberSlot {
            id,
            label: label.to_string(),
            tx,
        };
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .entry(topic)
            .or_default()
            .push(slot);

        debug!(subscriber = label, %topic, "subscribed");
        Subscription { topic, id, task }
    }

    /// Remove a subscription. Idempotent: removing an already-removed
    /// handle is a no-op.
    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut map = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(slots) = map.get_mut(&subscription.topic) {
            slots.retain(|slot| slot.id != subscription.id);
            if slots.is_empty() {
                map.remove(&subscription.topic);
            }
        }
        drop(map);
        // Cancel delivery so no handler runs after removal returns.
        subscription.task.abort();
    }

    /// Publish `payload` on `topic` to all current subscribers.
    ///
    /// Never fails: a stopped bus ignores the emit at debug level, a full
    /// subscriber queue drops the event for that subscriber with a warning.
    pub fn emit(&self, topic: EventTopic, payload: EventPayload) {
        self.emit_event(Event::new(topic, payload));
    }

    /// Publish with a conversation id stamped into the envelope.
    pub fn emit_in_conversation(
        &self,
        topic: EventTopic,
        payload: EventPayload,
        conversation_id: &str,
    ) {
        self.emit_event(Event::new(topic, payload).with_conversation(conversation_id));
    }

    /// Publish a fully-built envelope.
    pub fn emit_event(&self, event: Event) {
        if !self.inner.running.load(Ordering::Acquire) {
            debug!(topic = %event.topic, "bus stopped, dropping emit");
            return;
        }

        let event = Arc::new(event);
        let mut map = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let Some(slots) = map.get_mut(&event.topic) else {
            return;
        };

        slots.retain(|slot| {
            match slot.tx.try_send(Arc::clone(&event)) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        subscriber = %slot.label,
                        topic = %event.topic,
                        "subscriber queue full, dropping event"
                    );
                    true
                }
                // Delivery task is gone; forget the slot.
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }

    /// Total events dropped across all subscribers since creation.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Stop the bus: subsequent emits become no-ops and all delivery tasks
    /// wind down as their queues close.
    pub fn stop(&self) {
        self.inner.running.store(false, Ordering::Release);
        let mut map = self
            .inner
            .subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        map.clear();
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn collector() -> (Arc<Mutex<Vec<u64>>>, Arc<AtomicUsize>) {
        (Arc::new(Mutex::new(Vec::new())), Arc::new(AtomicUsize::new(0)))
    }

    #[tokio::test]
    async fn delivers_in_emit_order_to_a_subscriber() {
        let bus = EventBus::new();
        let (seen, _) = collector();
        let seen_clone = Arc::clone(&seen);
        let _sub = bus.subscribe(EventTopic::CliResponse, "test", move |event| {
            let seen = Arc::clone(&seen_clone);
            async move {
                seen.lock().unwrap().push(event.id);
                Ok(())
            }
        });

        for _ in 0..5 {
            bus.emit(
                EventTopic::CliResponse,
                EventPayload::CliResponse {
                    message: "ok".into(),
                    is_error: false,
                },
            );
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        let ids = seen.lock().unwrap().clone();
        assert_eq!(ids.len(), 5);
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn handler_error_does_not_stop_other_subscribers() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let _bad = bus.subscribe(EventTopic::SystemError, "bad", |_| async {
            Err(crate::error::CantinaError::HandlerFault("boom".into()))
        });
        let count_clone = Arc::clone(&count);
        let _good = bus.subscribe(EventTopic::SystemError, "good", move |_| {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.emit(
            EventTopic::SystemError,
            EventPayload::Error(crate::payloads::ErrorPayload {
                service: "test".into(),
                message: "x".into(),
            }),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let sub = bus.subscribe(EventTopic::CliCommand, "test", move |_| {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.unsubscribe(sub);
        bus.emit(
            EventTopic::CliCommand,
            EventPayload::Command(crate::command::Command::new("status", "status")),
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stopped_bus_ignores_emits() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = bus.subscribe(EventTopic::SystemShutdown, "test", move |_| {
            let count = Arc::clone(&count_clone);
            async move {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }
        });

        bus.stop();
        bus.emit(EventTopic::SystemShutdown, EventPayload::Empty);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(!bus.is_running());
    }

    #[tokio::test]
    async fn full_queue_drops_and_counts() {
        let bus = EventBus::with_queue_capacity(1);
        // Handler that blocks forever keeps the queue occupied.
        let _sub = bus.subscribe(EventTopic::AudioRawChunk, "slow", |_| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });

        for _ in 0..8 {
            bus.emit(
                EventTopic::AudioRawChunk,
                EventPayload::AudioChunk {
                    samples: vec![0; 4],
                    timestamp_ms: 0,
                },
            );
        }
        // First event is in-flight, second sits in the queue, the rest drop.
        assert!(bus.dropped_count() >= 5);
    }
}

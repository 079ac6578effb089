use super::types::{EventSequence, QueueEvent, QueueEventPayload};
use crate::logging::log_warn;
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub type EventReceiver = broadcast::Receiver<QueueEvent>;
pub type EventSender = broadcast::Sender<QueueEvent>;

/// Callback listener. Returning `Err` is logged and otherwise ignored.
pub type EventListener = Arc<dyn Fn(&QueueEvent) -> Result<(), String> + Send + Sync>;

/// Handle returned by [`EventBus::on`], used to unregister
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Event bus for distributing queue events.
///
/// Two delivery styles share one sequence: async receivers via
/// [`subscribe`](EventBus::subscribe) and synchronous callbacks via
/// [`on`](EventBus::on). Publishing never fails.
#[derive(Clone)]
pub struct EventBus {
    sender: EventSender,
    sequence: Arc<AtomicU64>,
    listeners: Arc<Mutex<Vec<(SubscriptionId, EventListener)>>>,
    next_listener_id: Arc<AtomicU64>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("sequence", &self.sequence)
            .field("receivers", &self.receiver_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            sequence: Arc::new(AtomicU64::new(1)),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Publish an event (returns sequence number)
    pub fn publish(&self, payload: QueueEventPayload) -> EventSequence {
        let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);

        let event = QueueEvent {
            sequence,
            timestamp: Utc::now(),
            payload,
        };

        // Having no receivers is not an error
        let _ = self.sender.send(event.clone());

        self.notify_listeners(&event);

        sequence
    }

    fn notify_listeners(&self, event: &QueueEvent) {
        // Snapshot so listeners may (un)subscribe from inside a callback
        let listeners: Vec<(SubscriptionId, EventListener)> = match self.listeners.lock() {
            Ok(listeners) => listeners.clone(),
            Err(_) => return,
        };

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => log_warn(
                    "events",
                    &format!("Listener {:?} failed on {}: {}", id, event.name(), e),
                ),
                Err(_) => log_warn(
                    "events",
                    &format!("Listener {:?} panicked on {}", id, event.name()),
                ),
            }
        }
    }

    /// Subscribe to events; dropping the receiver unsubscribes
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Register a callback listener
    pub fn on<F>(&self, listener: F) -> SubscriptionId
    where
        F: Fn(&QueueEvent) -> Result<(), String> + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_listener_id.fetch_add(1, Ordering::SeqCst));
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.push((id, Arc::new(listener)));
        }
        id
    }

    /// Unregister a callback listener; returns whether it was registered
    pub fn off(&self, id: SubscriptionId) -> bool {
        if let Ok(mut listeners) = self.listeners.lock() {
            let before = listeners.len();
            listeners.retain(|(listener_id, _)| *listener_id != id);
            listeners.len() != before
        } else {
            false
        }
    }

    /// Drop every callback listener
    pub fn clear_listeners(&self) {
        if let Ok(mut listeners) = self.listeners.lock() {
            listeners.clear();
        }
    }

    /// Get current sequence number
    pub fn current_sequence(&self) -> EventSequence {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Get number of active receivers
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }
}

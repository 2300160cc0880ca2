//! In-process publish/subscribe channel.
//!
//! Detectors announce lifecycle changes and exchange cross-detector signals
//! ("wifi toggled") through the bus instead of referencing each other.
//! Delivery is synchronous on the publishing thread, in registration order.

use crate::detector::types::DetectorType;
use crate::detector::DetectorState;
use crossbeam_channel::{Sender, TrySendError};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::warn;

/// Messages pushed to the session by the platform's service layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceMessage {
    /// The server confirmed the pending session owner.
    VerificationSuccess,
    /// The server revoked gathering for this owner.
    Terminate,
    /// Learning mode was toggled.
    Learning,
    /// A listener asked every detector to report its state.
    RequestDetectors,
}

/// A typed bus message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BusEvent {
    /// A detector changed lifecycle state.
    Status {
        detector: DetectorType,
        state: DetectorState,
    },
    /// Free-text diagnostic note.
    MetaData { message: String },
    /// Server-side trust score changed for a detector.
    TrustChanged {
        detector: DetectorType,
        score: f64,
        aggregate: f64,
    },
    /// Wifi was toggled or a rescan was requested (`message == None`).
    WifiChanged { message: Option<String> },
    /// Message relayed from the service layer.
    Service {
        kind: ServiceMessage,
        message: Option<String>,
    },
}

impl BusEvent {
    pub fn meta(message: impl Into<String>) -> Self {
        BusEvent::MetaData {
            message: message.into(),
        }
    }

    /// Flatten to the structure handed to external status listeners.
    pub fn to_status(&self) -> StatusEvent {
        match self {
            BusEvent::Status { detector, state } => StatusEvent {
                detector: Some(*detector),
                message: state.as_str().to_string(),
                score_delta: None,
                aggregate_score: None,
            },
            BusEvent::MetaData { message } => StatusEvent {
                detector: None,
                message: message.clone(),
                score_delta: None,
                aggregate_score: None,
            },
            BusEvent::TrustChanged {
                detector,
                score,
                aggregate,
            } => StatusEvent {
                detector: Some(*detector),
                message: "trust_changed".to_string(),
                score_delta: Some(*score),
                aggregate_score: Some(*aggregate),
            },
            BusEvent::WifiChanged { message } => StatusEvent {
                detector: Some(DetectorType::Network),
                message: message.clone().unwrap_or_else(|| "wifi_changed".to_string()),
                score_delta: None,
                aggregate_score: None,
            },
            BusEvent::Service { kind, message } => StatusEvent {
                detector: None,
                message: match message {
                    Some(m) => format!("{kind:?}: {m}"),
                    None => format!("{kind:?}"),
                },
                score_delta: None,
                aggregate_score: None,
            },
        }
    }
}

/// Structured status record for external listeners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub detector: Option<DetectorType>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score_delta: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub aggregate_score: Option<f64>,
}

/// Receives bus events. Called on the publishing thread.
pub trait Subscriber: Send + Sync {
    fn on_event(&self, event: &BusEvent);
}

impl<F> Subscriber for F
where
    F: Fn(&BusEvent) + Send + Sync,
{
    fn on_event(&self, event: &BusEvent) {
        self(event)
    }
}

/// Shared subscriber handle. Identity is the allocation, not the value.
pub type SharedSubscriber = Arc<dyn Subscriber>;

fn same_subscriber(a: &SharedSubscriber, b: &SharedSubscriber) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// The session-wide event bus.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<SharedSubscriber>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. Registering the same handle twice is a no-op.
    /// Returns true if the subscriber was added.
    pub fn subscribe(&self, subscriber: SharedSubscriber) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if subscribers.iter().any(|s| same_subscriber(s, &subscriber)) {
            return false;
        }
        subscribers.push(subscriber);
        true
    }

    /// Remove a subscriber. Unknown subscribers are ignored.
    /// Returns true if the subscriber was registered.
    pub fn unsubscribe(&self, subscriber: &SharedSubscriber) -> bool {
        let mut subscribers = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| !same_subscriber(s, subscriber));
        subscribers.len() != before
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Deliver an event to every registered subscriber, in registration order.
    ///
    /// A panicking subscriber is logged and skipped; later subscribers still
    /// receive the event. Returns the number of successful deliveries.
    pub fn publish(&self, event: BusEvent) -> usize {
        // Snapshot so subscribers may (un)subscribe while being called.
        let subscribers: Vec<SharedSubscriber> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let mut delivered = 0;
        for subscriber in subscribers {
            let result = panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_event(&event)));
            match result {
                Ok(()) => delivered += 1,
                Err(_) => warn!(event = ?event, "bus subscriber panicked; skipping"),
            }
        }
        delivered
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Subscriber that forwards events into a bounded channel without blocking.
///
/// Used to turn bus deliveries into a per-detector inbound queue, so a
/// detector publishing while locked never re-enters another detector.
pub struct ChannelSubscriber {
    sender: Sender<BusEvent>,
    filter: fn(&BusEvent) -> bool,
}

impl ChannelSubscriber {
    pub fn new(sender: Sender<BusEvent>, filter: fn(&BusEvent) -> bool) -> Self {
        Self { sender, filter }
    }
}

impl Subscriber for ChannelSubscriber {
    fn on_event(&self, event: &BusEvent) {
        if !(self.filter)(event) {
            return;
        }
        match self.sender.try_send(event.clone()) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => {}
            Err(TrySendError::Full(_)) => warn!("signal queue full; dropping bus event"),
        }
    }
}

/// Subscriber that keeps every event it sees. Handy for status feeds and tests.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<BusEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<BusEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Subscriber for EventLog {
    fn on_event(&self, event: &BusEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}

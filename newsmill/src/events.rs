//! In-process log fan-out for the control surface.
//!
//! Every INFO/WARN/ERROR event is kept in a small per-severity history and pushed to
//! every live subscriber. A new subscriber first receives that history, oldest first,
//! then live events, with nothing lost or repeated in between.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_subscriber::layer::Context;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warn,
    Error,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "INFO",
            Severity::Warn => "WARN",
            Severity::Error => "ERROR",
        }
    }

    fn from_level(level: &Level) -> Option<Self> {
        match *level {
            Level::ERROR => Some(Severity::Error),
            Level::WARN => Some(Severity::Warn),
            Level::INFO => Some(Severity::Info),
            _ => None,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub timestamp: DateTime<Utc>,
    pub severity: Severity,
    pub message: String,
}

impl LogEvent {
    pub fn new(severity: Severity, message: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            severity,
            message: message.into(),
        }
    }

    /// `[<rfc3339>] LEVEL: message`
    pub fn to_line(&self) -> String {
        format!(
            "[{}] {}: {}",
            self.timestamp.to_rfc3339(),
            self.severity,
            self.message
        )
    }
}

struct Inner {
    history: HashMap<Severity, VecDeque<(u64, LogEvent)>>,
    capacities: HashMap<Severity, usize>,
    subscribers: HashMap<u64, mpsc::UnboundedSender<LogEvent>>,
    next_seq: u64,
    next_subscriber: u64,
}

impl Inner {
    fn replay(&self) -> Vec<LogEvent> {
        let mut events: Vec<&(u64, LogEvent)> = self.history.values().flatten().collect();
        events.sort_by(|a, b| a.1.timestamp.cmp(&b.1.timestamp).then(a.0.cmp(&b.0)));
        events.into_iter().map(|(_, e)| e.clone()).collect()
    }
}

/// Cloneable handle; all clones share one history and subscriber list.
#[derive(Clone)]
pub struct EventBroadcaster {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    // A panicking subscriber must not take logging down with it.
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

impl EventBroadcaster {
    pub fn new(info_capacity: usize, warn_capacity: usize, error_capacity: usize) -> Self {
        let capacities = HashMap::from([
            (Severity::Info, info_capacity),
            (Severity::Warn, warn_capacity),
            (Severity::Error, error_capacity),
        ]);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                history: HashMap::new(),
                capacities,
                subscribers: HashMap::new(),
                next_seq: 0,
                next_subscriber: 0,
            })),
        }
    }

    pub fn from_config(cfg: &common::EventsConfig) -> Self {
        Self::new(cfg.info_capacity, cfg.warn_capacity, cfg.error_capacity)
    }

    /// Applies new history sizes, dropping the oldest events that no longer fit.
    pub fn resize(&self, cfg: &common::EventsConfig) {
        let mut inner = lock(&self.inner);
        inner.capacities = HashMap::from([
            (Severity::Info, cfg.info_capacity),
            (Severity::Warn, cfg.warn_capacity),
            (Severity::Error, cfg.error_capacity),
        ]);
        let Inner { history, capacities, .. } = &mut *inner;
        for (severity, fifo) in history.iter_mut() {
            let capacity = capacities.get(severity).copied().unwrap_or(0);
            while fifo.len() > capacity {
                fifo.pop_front();
            }
        }
    }

    /// Records the event and hands it to every current subscriber.
    ///
    /// Must not log: it runs inside the tracing layer.
    pub fn publish(&self, event: LogEvent) {
        let mut inner = lock(&self.inner);

        let seq = inner.next_seq;
        inner.next_seq += 1;

        let capacity = inner.capacities.get(&event.severity).copied().unwrap_or(0);
        if capacity > 0 {
            let fifo = inner.history.entry(event.severity).or_default();
            if fifo.len() >= capacity {
                fifo.pop_front();
            }
            fifo.push_back((seq, event.clone()));
        }

        // Subscribers whose receiver is gone are pruned here.
        inner.subscribers.retain(|_, tx| tx.send(event.clone()).is_ok());
    }

    /// Replay of the history in timestamp order, followed by live events.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = lock(&self.inner);

        for event in inner.replay() {
            // Cannot fail: the receiver is still in our hands.
            let _ = tx.send(event);
        }

        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.insert(id, tx);

        Subscription {
            id,
            receiver: rx,
            broadcaster: Arc::downgrade(&self.inner),
        }
    }

    /// Removes the subscription. Nothing is delivered to it afterwards.
    pub fn unsubscribe(&self, subscription: Subscription) {
        drop(subscription);
    }

    pub fn subscriber_count(&self) -> usize {
        lock(&self.inner).subscribers.len()
    }

    /// Current history, oldest first.
    pub fn history(&self) -> Vec<LogEvent> {
        lock(&self.inner).replay()
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(100, 50, 50)
    }
}

/// A subscriber's mailbox. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    receiver: mpsc::UnboundedReceiver<LogEvent>,
    broadcaster: Weak<Mutex<Inner>>,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<LogEvent> {
        self.receiver.recv().await
    }

    /// Next already-delivered event, if any.
    pub fn try_recv(&mut self) -> Option<LogEvent> {
        self.receiver.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.broadcaster.upgrade() {
            lock(&inner).subscribers.remove(&self.id);
        }
    }
}

/// Forwards INFO and above into an [`EventBroadcaster`].
pub struct BroadcastLayer {
    broadcaster: EventBroadcaster,
}

impl BroadcastLayer {
    pub fn new(broadcaster: EventBroadcaster) -> Self {
        Self { broadcaster }
    }
}

impl<S> tracing_subscriber::Layer<S> for BroadcastLayer
where
    S: tracing::Subscriber,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let Some(severity) = Severity::from_level(event.metadata().level()) else {
            return;
        };
        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.broadcaster
            .publish(LogEvent::new(severity, visitor.finish()));
    }
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<String>,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{} {}", self.message, self.fields.join(" "))
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push(format!("{}={}", field.name(), value));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            self.fields.push(format!("{}={:?}", field.name(), value));
        }
    }
}

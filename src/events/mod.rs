//! In-process event bus + SSE fan-out (spec §4.5).
//!
//! Grounded on the teacher's `AgentOrchestrator` concurrency style
//! (`orchestrator/mod.rs`): `Arc<RwLock<_>>` for the structure many tasks
//! read and occasionally mutate (the bounded history, the client list),
//! `tokio::sync::mpsc` for the per-subscriber outbound queue, and one
//! `tokio::spawn`ed task per subscriber doing its own batching — mirroring
//! the teacher's "one task per loop" pattern in `AgentOrchestrator::run`.

use crate::clock::Clock;
use crate::constants::{DEFAULT_BATCH_WINDOW_MS, EVENT_HISTORY_CAP};
use crate::models::{Event, EventType};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::{debug, warn};

/// Inline listener invoked synchronously after every successful append.
/// A failing listener is logged and otherwise ignored — one misbehaving
/// listener must never block delivery to the others (spec §7).
#[async_trait]
pub trait EventListener: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_event(&self, event: &Event);
}

/// What an SSE subscriber wants to see.
#[derive(Debug, Clone, Default)]
pub struct SseFilter {
    pub topics: Option<Vec<String>>,
    pub types: Option<Vec<EventType>>,
    pub agent: Option<String>,
}

impl SseFilter {
    fn matches(&self, event: &Event) -> bool {
        if let Some(types) = &self.types {
            if !types.iter().any(|t| t.as_str() == event.event_type.as_str()) {
                return false;
            }
        }
        if let Some(agent) = &self.agent {
            if event.agent.as_deref() != Some(agent.as_str()) {
                return false;
            }
        }
        if let Some(topics) = &self.topics {
            let topic = event
                .data
                .get("channel")
                .and_then(Value::as_str)
                .unwrap_or("");
            if !topics.is_empty() && !topics.iter().any(|t| t == topic) {
                return false;
            }
        }
        true
    }
}

/// What gets written out over the SSE wire: one `event: <type>` frame, or a
/// synthetic `batch` frame wrapping several (spec §4.5).
#[derive(Debug, Clone)]
pub enum SseFrame {
    Single(Event),
    Batch(Vec<Event>),
}

struct Subscriber {
    id: u64,
    filter: SseFilter,
    queue: Arc<Mutex<Vec<Event>>>,
}

/// Bounded, totally-ordered event history plus fan-out to inline listeners
/// and SSE subscribers.
pub struct EventBus {
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    history: RwLock<VecDeque<Event>>,
    listeners: RwLock<Vec<Arc<dyn EventListener>>>,
    subscribers: RwLock<Vec<Subscriber>>,
    next_subscriber_id: AtomicU64,
    batch_window_ms: AtomicU64,
}

impl EventBus {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            next_id: AtomicU64::new(1),
            history: RwLock::new(VecDeque::with_capacity(EVENT_HISTORY_CAP)),
            listeners: RwLock::new(Vec::new()),
            subscribers: RwLock::new(Vec::new()),
            next_subscriber_id: AtomicU64::new(1),
            batch_window_ms: AtomicU64::new(DEFAULT_BATCH_WINDOW_MS),
        }
    }

    pub async fn register_listener(&self, listener: Arc<dyn EventListener>) {
        self.listeners.write().await.push(listener);
    }

    pub fn set_batch_window_ms(&self, ms: u64) {
        self.batch_window_ms.store(ms, Ordering::Relaxed);
    }

    /// Publishes an event: assigns id/timestamp, appends to bounded history,
    /// runs inline listeners, then fans out to matching SSE subscribers.
    /// Non-blocking from the caller's perspective beyond the lock hops.
    pub async fn publish(&self, event_type: EventType, agent: Option<String>, task_id: Option<String>, data: Value) -> Event {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let event = Event {
            id,
            event_type,
            timestamp: self.clock.now_ms(),
            agent,
            task_id,
            data,
        };

        {
            let mut history = self.history.write().await;
            history.push_back(event.clone());
            while history.len() > EVENT_HISTORY_CAP {
                history.pop_front();
            }
        }

        for listener in self.listeners.read().await.iter() {
            // Listener failures are swallowed (spec §7); `on_event` itself
            // never returns a Result so a panicking listener would still
            // take down the bus — callers are expected to catch_unwind
            // internally if their logic can fail in ways worth isolating.
            debug!(listener = listener.name(), event_id = id, "dispatching to inline listener");
            listener.on_event(&event).await;
        }

        {
            let subs = self.subscribers.read().await;
            for sub in subs.iter().filter(|s| s.filter.matches(&event)) {
                sub.queue.lock().await.push(event.clone());
            }
        }

        event
    }

    /// Registers a new SSE subscriber and spawns its batching flush loop.
    /// Returns a receiver the HTTP layer turns into an SSE byte stream.
    pub async fn subscribe(&self, filter: SseFilter) -> (u64, mpsc::UnboundedReceiver<SseFrame>) {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let queue = Arc::new(Mutex::new(Vec::new()));
        self.subscribers.write().await.push(Subscriber {
            id,
            filter,
            queue: queue.clone(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let batch_window = self.batch_window_ms.load(Ordering::Relaxed);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_millis(batch_window.max(1)));
            loop {
                interval.tick().await;
                let mut drained = {
                    let mut q = queue.lock().await;
                    if q.is_empty() {
                        continue;
                    }
                    std::mem::take(&mut *q)
                };
                let frame = if drained.len() == 1 {
                    SseFrame::Single(drained.remove(0))
                } else {
                    SseFrame::Batch(drained)
                };
                if tx.send(frame).is_err() {
                    // Receiver (the HTTP connection) is gone; stop flushing.
                    break;
                }
            }
        });

        (id, rx)
    }

    pub async fn unsubscribe(&self, id: u64) {
        self.subscribers.write().await.retain(|s| s.id != id);
    }

    /// Serves `/activity?since=&limit=&agent=` (spec §4.5).
    pub async fn activity_since(&self, since: Option<i64>, limit: Option<usize>, agent: Option<&str>) -> Vec<Event> {
        let history = self.history.read().await;
        let mut out: Vec<Event> = history
            .iter()
            .filter(|e| since.map(|s| e.timestamp >= s).unwrap_or(true))
            .filter(|e| agent.map(|a| e.agent.as_deref() == Some(a)).unwrap_or(true))
            .cloned()
            .collect();
        if let Some(limit) = limit {
            if out.len() > limit {
                let excess = out.len() - limit;
                out.drain(0..excess);
            }
        }
        out
    }

    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }
}

/// Port used by producers that only need to publish, not subscribe —
/// keeps the bridge/watchdogs decoupled from the concrete bus (spec §9).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, event_type: EventType, agent: Option<String>, task_id: Option<String>, data: Value) -> Event;
}

#[async_trait]
impl EventSink for EventBus {
    async fn publish(&self, event_type: EventType, agent: Option<String>, task_id: Option<String>, data: Value) -> Event {
        EventBus::publish(self, event_type, agent, task_id, data).await
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;

    struct CountingListener(Arc<std::sync::atomic::AtomicUsize>);

    #[async_trait]
    impl EventListener for CountingListener {
        fn name(&self) -> &'static str {
            "counting"
        }
        async fn on_event(&self, _event: &Event) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn publish_assigns_monotonic_ids_and_preserves_order() {
        let bus = EventBus::new(Arc::new(SystemClock));
        let e1 = bus.publish(EventType::TaskCreated, None, None, Value::Null).await;
        let e2 = bus.publish(EventType::TaskUpdated, None, None, Value::Null).await;
        assert!(e2.id > e1.id);
        let history = bus.activity_since(None, None, None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].id, e1.id);
        assert_eq!(history[1].id, e2.id);
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let bus = EventBus::new(Arc::new(SystemClock));
        for _ in 0..(EVENT_HISTORY_CAP + 10) {
            bus.publish(EventType::TaskUpdated, None, None, Value::Null).await;
        }
        let history = bus.activity_since(None, None, None).await;
        assert_eq!(history.len(), EVENT_HISTORY_CAP);
    }

    #[tokio::test]
    async fn sse_subscriber_receives_matching_events_only() {
        let bus = EventBus::new(Arc::new(SystemClock));
        bus.set_batch_window_ms(10);
        let (_id, mut rx) = bus
            .subscribe(SseFilter {
                topics: None,
                types: Some(vec![EventType::TaskCreated]),
                agent: None,
            })
            .await;

        bus.publish(EventType::TaskUpdated, None, None, Value::Null).await;
        bus.publish(EventType::TaskCreated, None, None, Value::Null).await;

        let frame = tokio::time::timeout(std::time::Duration::from_millis(200), rx.recv())
            .await
            .expect("frame should arrive")
            .expect("channel should stay open");
        match frame {
            SseFrame::Single(e) => assert_eq!(e.event_type.as_str(), "task_created"),
            SseFrame::Batch(events) => panic!("expected single frame, got batch of {}", events.len()),
        }
    }
}

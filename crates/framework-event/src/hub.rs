//! Event hub: subscriptions, publishing, replies and the connection state.
//!
//! ```text
//! publish ──► Transport ──► (bus / broker) ──► Transport ──► wait() ──► dispatch
//!                                                                        │
//!                             subscriber returns Some(v) ◄───────────────┘
//!                                       │
//!                                       └──► reply event (ftrack.meta.reply)
//! ```
//!
//! Callbacks always run outside the registry lock, so a callback may
//! subscribe, unsubscribe or publish.
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::error::{EventError, Result};
use crate::event::Event;
use crate::filter::Filter;
use crate::transport::Transport;

pub type Callback = Arc<dyn Fn(&Event) -> Option<Value> + Send + Sync>;
pub type ReplyHandler = Arc<dyn Fn(&Event) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
        })
    }
}

struct Subscriber {
    id: SubscriptionId,
    filter: Filter,
    callback: Callback,
}

pub struct EventHub {
    id: String,
    transport: Box<dyn Transport>,
    subscribers: Mutex<Vec<Subscriber>>,
    replies: Mutex<HashMap<String, ReplyHandler>>,
    state: Mutex<ConnectionState>,
    state_changed: Condvar,
    next_subscription: AtomicU64,
}

impl EventHub {
    pub fn new(transport: impl Transport + 'static) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            transport: Box::new(transport),
            subscribers: Mutex::new(Vec::new()),
            replies: Mutex::new(HashMap::new()),
            state: Mutex::new(ConnectionState::Disconnected),
            state_changed: Condvar::new(),
            next_subscription: AtomicU64::new(1),
        }
    }

    /// Source id stamped on every event this hub publishes.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    #[instrument(skip(self), fields(hub = %self.id, endpoint = %self.transport.describe()))]
    pub fn connect(&self) -> Result<()> {
        self.set_state(ConnectionState::Connecting);
        match self.transport.connect() {
            Ok(()) => {
                self.set_state(ConnectionState::Connected);
                info!("event hub connected");
                Ok(())
            }
            Err(e) => {
                self.set_state(ConnectionState::Disconnected);
                warn!(error = %e, "event hub failed to connect");
                Err(e)
            }
        }
    }

    /// Blocks until connected or `timeout` elapses.
    pub fn wait_until_connected(&self, timeout: Duration) -> Result<()> {
        let guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let (guard, _) = self
            .state_changed
            .wait_timeout_while(guard, timeout, |state| *state != ConnectionState::Connected)
            .unwrap_or_else(PoisonError::into_inner);
        if *guard == ConnectionState::Connected {
            Ok(())
        } else {
            Err(EventError::ConnectTimeout(timeout))
        }
    }

    pub fn disconnect(&self) {
        if self.state() == ConnectionState::Disconnected {
            return;
        }
        self.transport.disconnect();
        self.set_state(ConnectionState::Disconnected);
        debug!(hub = %self.id, "event hub disconnected");
    }

    pub fn subscribe<F>(&self, expression: &str, callback: F) -> Result<SubscriptionId>
    where
        F: Fn(&Event) -> Option<Value> + Send + Sync + 'static,
    {
        let filter = Filter::parse(expression)?;
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::Relaxed));
        debug!(subscription = id.0, %filter, "subscribed");
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                filter,
                callback: Arc::new(callback),
            });
        Ok(id)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(PoisonError::into_inner);
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        before != subscribers.len()
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Hands `event` to the transport. Local delivery happens in [`wait`].
    ///
    /// [`wait`]: EventHub::wait
    pub fn publish(&self, mut event: Event) -> Result<String> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(EventError::NotConnected(state.to_string()));
        }
        if event.source.id.is_empty() {
            event.source.id = self.id.clone();
        }
        self.transport.send(&event)?;
        Ok(event.id)
    }

    /// Dispatches `event` to this hub's subscribers in the calling thread and
    /// returns what they returned. Nothing goes over the transport.
    pub fn publish_sync(&self, mut event: Event) -> Vec<Value> {
        if event.source.id.is_empty() {
            event.source.id = self.id.clone();
        }
        self.handle(&event)
    }

    /// Publishes `event` and calls `on_reply` for every reply to it until
    /// [`forget_reply`](EventHub::forget_reply) is called with the returned id.
    pub fn publish_with_reply<F>(&self, event: Event, on_reply: F) -> Result<String>
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let event_id = event.id.clone();
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(event_id.clone(), Arc::new(on_reply));
        if let Err(e) = self.publish(event) {
            self.forget_reply(&event_id);
            return Err(e);
        }
        Ok(event_id)
    }

    pub fn forget_reply(&self, event_id: &str) -> bool {
        self.replies
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(event_id)
            .is_some()
    }

    /// Receives and dispatches events for up to `duration`. A zero duration
    /// dispatches whatever is already queued. Returns how many events were
    /// dispatched.
    ///
    /// A transport that reports its connection gone moves the hub to
    /// [`ConnectionState::Disconnected`].
    pub fn wait(&self, duration: Duration) -> Result<usize> {
        let state = self.state();
        if state != ConnectionState::Connected {
            return Err(EventError::NotConnected(state.to_string()));
        }
        let deadline = Instant::now() + duration;
        let mut dispatched = 0;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.transport.recv_timeout(remaining) {
                Ok(Some(event)) => {
                    self.dispatch(&event);
                    dispatched += 1;
                }
                Ok(None) => return Ok(dispatched),
                Err(e @ EventError::Transport(_)) => {
                    self.transport.disconnect();
                    self.set_state(ConnectionState::Disconnected);
                    warn!(hub = %self.id, error = %e, "event hub lost its connection");
                    return Err(e);
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn dispatch(&self, event: &Event) {
        if event.is_reply() {
            let handler = event.in_reply_to_event.as_ref().and_then(|original| {
                self.replies
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(original)
                    .cloned()
            });
            if let Some(handler) = handler {
                if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
                    warn!(topic = %event.topic, "reply handler panicked");
                }
            }
            return;
        }

        for value in self.handle(event) {
            let reply = event.reply(value);
            if let Err(e) = self.publish(reply) {
                warn!(error = %e, topic = %event.topic, "could not send reply");
            }
        }
    }

    fn handle(&self, event: &Event) -> Vec<Value> {
        let callbacks: Vec<(SubscriptionId, Callback)> = self
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.filter.matches(event))
            .map(|s| (s.id, Arc::clone(&s.callback)))
            .collect();

        callbacks
            .into_iter()
            .filter_map(|(id, callback)| {
                match catch_unwind(AssertUnwindSafe(|| callback(event))) {
                    Ok(result) => result,
                    Err(_) => {
                        warn!(subscription = id.0, topic = %event.topic, "subscriber panicked");
                        None
                    }
                }
            })
            .collect()
    }

    fn set_state(&self, state: ConnectionState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
        self.state_changed.notify_all();
    }
}

impl Drop for EventHub {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::LocalBus;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn connected(bus: &LocalBus) -> EventHub {
        let hub = EventHub::new(bus.attach());
        hub.connect().unwrap();
        hub
    }

    #[test]
    fn test_publish_requires_connection() {
        let hub = EventHub::new(LocalBus::new().attach());
        let err = hub.publish(Event::new("t", json!({}))).unwrap_err();
        assert!(matches!(err, EventError::NotConnected(_)));
    }

    #[test]
    fn test_wait_until_connected_times_out() {
        let hub = EventHub::new(LocalBus::new().attach());
        let start = Instant::now();
        let err = hub.wait_until_connected(Duration::from_millis(50)).unwrap_err();
        assert!(matches!(err, EventError::ConnectTimeout(_)));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_publish_sync_aggregates_results() {
        let hub = EventHub::new(LocalBus::new().attach());
        hub.subscribe("topic=a.*", |_| Some(json!(1))).unwrap();
        hub.subscribe("a.b", |_| Some(json!(2))).unwrap();
        hub.subscribe("a.b", |_| None).unwrap();
        hub.subscribe("c", |_| Some(json!(3))).unwrap();

        let results = hub.publish_sync(Event::new("a.b", json!({})));
        assert_eq!(results, vec![json!(1), json!(2)]);
    }

    #[test]
    fn test_async_delivery_happens_in_wait() {
        let bus = LocalBus::new();
        let hub = connected(&bus);
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        hub.subscribe("ping", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            None
        })
        .unwrap();

        hub.publish(Event::new("ping", json!({}))).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(hub.wait(Duration::ZERO).unwrap(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_returned_value_becomes_reply() {
        let bus = LocalBus::new();
        let requester = connected(&bus);
        let responder = connected(&bus);
        responder.subscribe("question", |event| Some(json!({"echo": event.data["n"]}))).unwrap();

        let replies = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&replies);
        let id = requester
            .publish_with_reply(Event::new("question", json!({"n": 7})), move |reply| {
                sink.lock().unwrap().push(reply.data.clone())
            })
            .unwrap();

        responder.wait(Duration::ZERO).unwrap();
        requester.wait(Duration::ZERO).unwrap();
        assert_eq!(*replies.lock().unwrap(), vec![json!({"echo": 7})]);

        assert!(requester.forget_reply(&id));
        assert!(!requester.forget_reply(&id));
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let hub = EventHub::new(LocalBus::new().attach());
        let id = hub.subscribe("t", |_| Some(json!(true))).unwrap();
        assert!(hub.unsubscribe(id));
        assert!(!hub.unsubscribe(id));
        assert!(hub.publish_sync(Event::new("t", json!({}))).is_empty());
    }

    #[test]
    fn test_panicking_subscriber_is_isolated() {
        let hub = EventHub::new(LocalBus::new().attach());
        hub.subscribe("t", |_| panic!("subscriber bug")).unwrap();
        hub.subscribe("t", |_| Some(json!("ok"))).unwrap();
        assert_eq!(hub.publish_sync(Event::new("t", json!({}))), vec![json!("ok")]);
    }

    #[test]
    fn test_callback_may_subscribe_without_deadlock() {
        let hub = Arc::new(EventHub::new(LocalBus::new().attach()));
        let inner = Arc::clone(&hub);
        hub.subscribe("t", move |_| {
            inner.subscribe("u", |_| None).ok();
            None
        })
        .unwrap();
        hub.publish_sync(Event::new("t", json!({})));
        assert_eq!(hub.subscription_count(), 2);
    }
}

//! Client: UI-side discovery and run-request issuance.
//!
//! The client never blocks the thread that drains its hub; every wait here
//! blocks the caller on a channel fed from the event thread. Do not call the
//! blocking methods from inside a hub callback.
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use framework_core::{LogItem, PipelineResult, PipelineType, RunOptions};
use framework_event::{Event, EventHub, Session, SubscriptionId};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::connection::HostConnection;
use crate::error::ClientError;
use crate::history::RunRecord;
use crate::protocol::{
    topics, DisconnectNotice, HostInfo, RunRequest, RunResultPayload, UiHookReply, UiHookRequest,
};

struct ClientInner {
    hub: Arc<EventHub>,
    hosts: Mutex<BTreeMap<String, HostConnection>>,
    pending: Mutex<HashMap<String, Sender<RunResultPayload>>>,
}

impl ClientInner {
    fn discover(&self, timeout: Duration) -> Result<Vec<HostConnection>, ClientError> {
        let (tx, rx) = unbounded();
        let discovery = Event::new(topics::DISCOVER, json!({}));
        let event_id = self.hub.publish_with_reply(discovery, move |reply| {
            let _ = tx.send(reply.data.clone());
        })?;

        let deadline = Instant::now() + timeout;
        let mut found: Vec<HostConnection> = Vec::new();
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            let data = match rx.recv_timeout(remaining) {
                Ok(data) => data,
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            };
            match serde_json::from_value::<HostInfo>(data) {
                Ok(info) => {
                    let connection = HostConnection::from_info(info);
                    debug!(host_id = %connection.host_id, "host replied");
                    self.lock_hosts()
                        .insert(connection.host_id.clone(), connection.clone());
                    found.retain(|h| h.host_id != connection.host_id);
                    found.push(connection);
                }
                Err(e) => warn!(error = %e, "ignoring malformed discovery reply"),
            }
        }
        self.hub.forget_reply(&event_id);
        self.lock_hosts().retain(|host_id, _| {
            let answered = found.iter().any(|h| &h.host_id == host_id);
            if !answered {
                info!(host_id = %host_id, "host stopped answering, dropped");
            }
            answered
        });
        info!(hosts = found.len(), "discovery finished");
        Ok(found)
    }

    fn route_result(&self, event: &Event) {
        let payload: RunResultPayload = match serde_json::from_value(event.data.clone()) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, "malformed run result");
                return;
            }
        };
        let waiter = self.lock_pending().remove(&payload.request_id);
        match waiter {
            Some(waiter) => {
                let _ = waiter.send(payload);
            }
            None => debug!(request_id = %payload.request_id, "dropping unmatched run result"),
        }
    }

    fn forget_host(&self, event: &Event) {
        if let Ok(notice) = serde_json::from_value::<DisconnectNotice>(event.data.clone()) {
            if self.lock_hosts().remove(&notice.host_id).is_some() {
                info!(host_id = %notice.host_id, "host disconnected");
            }
        }
    }

    fn lock_hosts(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, HostConnection>> {
        self.hosts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, HashMap<String, Sender<RunResultPayload>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Client {
    inner: Arc<ClientInner>,
    subscriptions: Vec<SubscriptionId>,
}

impl Client {
    pub fn new(session: &Session) -> Result<Self, ClientError> {
        let inner = Arc::new(ClientInner {
            hub: Arc::clone(session.hub()),
            hosts: Mutex::new(BTreeMap::new()),
            pending: Mutex::new(HashMap::new()),
        });

        let results = Arc::clone(&inner);
        let result_subscription = inner.hub.subscribe(topics::RUN_RESULT, move |event| {
            results.route_result(event);
            None
        })?;
        let hosts = Arc::clone(&inner);
        let disconnect_subscription = inner.hub.subscribe(topics::DISCONNECT, move |event| {
            hosts.forget_host(event);
            None
        })?;

        Ok(Self {
            inner,
            subscriptions: vec![result_subscription, disconnect_subscription],
        })
    }

    /// Publishes a discovery request and gathers replies for `timeout`.
    /// No reply is an empty list.
    pub fn discover_hosts(&self, timeout: Duration) -> Result<Vec<HostConnection>, ClientError> {
        self.inner.discover(timeout)
    }

    /// Runs discovery on a background thread and hands the hosts to
    /// `callback` once it settles.
    pub fn on_ready<F>(&self, callback: F, timeout: Duration) -> Result<JoinHandle<()>, ClientError>
    where
        F: FnOnce(Vec<HostConnection>) + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("host-discovery".into())
            .spawn(move || {
                let hosts = inner.discover(timeout).unwrap_or_else(|e| {
                    warn!(error = %e, "discovery failed");
                    Vec::new()
                });
                callback(hosts);
            })?;
        Ok(handle)
    }

    /// Hosts that answered the latest discovery and have not disconnected
    /// since.
    pub fn hosts(&self) -> Vec<HostConnection> {
        self.inner.lock_hosts().values().cloned().collect()
    }

    pub fn host(&self, host_id: &str) -> Option<HostConnection> {
        self.inner.lock_hosts().get(host_id).cloned()
    }

    /// Sends a run request without waiting for it.
    pub fn submit(
        &self,
        host: &HostConnection,
        pipeline_type: PipelineType,
        definition: Option<&str>,
        options: RunOptions,
    ) -> Result<RunTicket, ClientError> {
        let request = RunRequest {
            pipeline_type,
            host_id: host.host_id.clone(),
            request_id: uuid::Uuid::new_v4().to_string(),
            definition: definition.map(str::to_string),
            options,
        };
        let (tx, rx) = bounded(1);
        self.inner.lock_pending().insert(request.request_id.clone(), tx);

        let sent = request
            .to_event()
            .map_err(ClientError::from)
            .and_then(|event| self.inner.hub.publish(event).map_err(ClientError::from));
        if let Err(e) = sent {
            self.inner.lock_pending().remove(&request.request_id);
            return Err(e);
        }
        debug!(request_id = %request.request_id, host_id = %host.host_id, "run request sent");
        Ok(RunTicket {
            request_id: request.request_id,
            host_id: request.host_id,
            receiver: rx,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Sends a run request and blocks for its result.
    pub fn run(
        &self,
        host: &HostConnection,
        pipeline_type: PipelineType,
        definition: Option<&str>,
        options: RunOptions,
        timeout: Duration,
    ) -> Result<RunReport, ClientError> {
        self.submit(host, pipeline_type, definition, options)?.wait(timeout)
    }

    /// Past runs kept by `host`, optionally for one definition only.
    pub fn history(
        &self,
        host: &HostConnection,
        definition: Option<&str>,
        timeout: Duration,
    ) -> Result<Vec<RunRecord>, ClientError> {
        let report = self.run(host, PipelineType::LogViewer, definition, RunOptions::new(), timeout)?;
        Ok(report.history)
    }

    /// Round-trips a live query to one plugin's ui hook.
    pub fn ui_hook(&self, request: UiHookRequest, timeout: Duration) -> Result<Value, ClientError> {
        let (tx, rx) = bounded(1);
        let event_id = self.inner.hub.publish_with_reply(request.to_event()?, move |reply| {
            let _ = tx.try_send(reply.data.clone());
        })?;
        let answer = rx.recv_timeout(timeout);
        self.inner.hub.forget_reply(&event_id);

        let data = answer.map_err(|_| ClientError::Timeout {
            what: format!("ui hook reply from {}", request.plugin),
            after: timeout,
        })?;
        match serde_json::from_value::<UiHookReply>(data)? {
            UiHookReply::Ok { result } => Ok(result),
            UiHookReply::Failed { message } => Err(ClientError::UiHook(message)),
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        for id in self.subscriptions.drain(..) {
            self.inner.hub.unsubscribe(id);
        }
    }
}

/// Handle on a submitted run. Dropping it stops listening; a result that
/// arrives afterwards is discarded.
pub struct RunTicket {
    request_id: String,
    host_id: String,
    receiver: Receiver<RunResultPayload>,
    inner: Arc<ClientInner>,
}

impl RunTicket {
    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn wait(self, timeout: Duration) -> Result<RunReport, ClientError> {
        match self.receiver.recv_timeout(timeout) {
            Ok(payload) => RunReport::from_payload(payload),
            Err(_) => Err(ClientError::Timeout {
                what: format!("run result from host {}", self.host_id),
                after: timeout,
            }),
        }
    }

    /// The result if it has already arrived.
    pub fn try_result(&self) -> Option<Result<RunReport, ClientError>> {
        self.receiver.try_recv().ok().map(RunReport::from_payload)
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        self.inner.lock_pending().remove(&self.request_id);
    }
}

/// What the UI shows for a finished request.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub request_id: String,
    pub host_id: String,
    pub pipeline_type: PipelineType,
    pub result: Option<PipelineResult>,
    pub history: Vec<RunRecord>,
}

impl RunReport {
    fn from_payload(payload: RunResultPayload) -> Result<Self, ClientError> {
        if let Some(message) = payload.error {
            return Err(ClientError::RunFailed {
                host_id: payload.host_id,
                message,
            });
        }
        Ok(Self {
            request_id: payload.request_id,
            host_id: payload.host_id,
            pipeline_type: payload.pipeline_type,
            result: payload.result,
            history: payload.history,
        })
    }

    pub fn status(&self) -> bool {
        self.result.as_ref().map_or(true, |r| r.status)
    }

    pub fn log_items(&self) -> &[LogItem] {
        self.result
            .as_ref()
            .map(|r| r.log_items.as_slice())
            .unwrap_or(&[])
    }

    /// Message of the first failing non-finalizer plugin.
    pub fn first_failure(&self) -> Option<&str> {
        let result = self.result.as_ref()?;
        result.first_failure.as_deref().or_else(|| {
            result
                .log_items
                .iter()
                .find(|item| !item.boolean_status && !item.is_finalizer())
                .and_then(|item| item.message.as_deref())
        })
    }

    /// One line per LogItem, labelled with its status.
    pub fn lines(&self) -> Vec<String> {
        self.log_items().iter().map(LogItem::summary).collect()
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.status() { "passed" } else { "FAILED" };
        match &self.result {
            Some(result) => writeln!(
                f,
                "{} '{}' on {}: {} ({:.4}s)",
                self.pipeline_type, result.definition, self.host_id, verdict, result.execution_time
            )?,
            None => writeln!(f, "{} on {}: {} run(s)", self.pipeline_type, self.host_id, self.history.len())?,
        }
        for line in self.lines() {
            writeln!(f, "  {}", line)?;
        }
        if let Some(message) = self.first_failure() {
            writeln!(f, "first failure: {}", message)?;
        }
        Ok(())
    }
}

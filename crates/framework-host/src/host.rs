//! Host: the DCC-side registration that answers discovery, runs pipelines
//! and serves ui hooks.
//!
//! ```text
//! discover ─► HostInfo (auto-reply)
//! run      ─► worker thread ─► EngineRunner ─► log_item events ─► run.result
//! ui_hook  ─► EngineRunner::run_ui_hook ─► UiHookReply (auto-reply)
//! ```
use framework_core::{
    load_definitions, EngineRunner, FinalizerPolicy, LogItem, MainThreadHandle, PipelineDefinition,
    PipelineResult, PipelineType, PluginExecutor, PluginResolver, FRAMEWORK_VERSION,
};
use framework_event::{Event, EventHub, Session, SubscriptionId};
use framework_registry::PluginRegistry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use tracing::{debug, error, info, instrument, warn};

use crate::config::FrameworkConfig;
use crate::error::HostError;
use crate::history::{RunHistory, RunRecord};
use crate::protocol::{
    host_filter, topics, DefinitionSummary, DisconnectNotice, HostInfo, LogItemEvent, RunRequest,
    RunResultPayload, UiHookReply, UiHookRequest,
};

/// Tag every host advertises next to its DCC tag.
pub const UI_HOST_TYPE: &str = "qt";

pub struct HostBuilder {
    dcc: String,
    registry: Arc<PluginRegistry>,
    definitions: Vec<PipelineDefinition>,
    config: FrameworkConfig,
    main_thread: Option<MainThreadHandle>,
    finalizer_policy: FinalizerPolicy,
    store_snapshots: bool,
}

impl HostBuilder {
    pub fn with_registry(mut self, registry: Arc<PluginRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_definitions(mut self, definitions: Vec<PipelineDefinition>) -> Self {
        self.definitions.extend(definitions);
        self
    }

    pub fn with_definition(mut self, definition: PipelineDefinition) -> Self {
        self.definitions.push(definition);
        self
    }

    pub fn with_config(mut self, config: FrameworkConfig) -> Self {
        self.config = config;
        self
    }

    /// Lets plugins that need the DCC main thread hop onto it.
    pub fn with_main_thread(mut self, handle: MainThreadHandle) -> Self {
        self.main_thread = Some(handle);
        self
    }

    pub fn with_finalizer_policy(mut self, policy: FinalizerPolicy) -> Self {
        self.finalizer_policy = policy;
        self
    }

    pub fn with_store_snapshots(mut self, enabled: bool) -> Self {
        self.store_snapshots = enabled;
        self
    }

    /// Adds every definition file found under the configured paths.
    pub fn load_definitions(mut self) -> Result<Self, HostError> {
        let found = load_definitions(&self.config.definition_paths)?;
        debug!(count = found.len(), "definitions loaded from disk");
        self.definitions.extend(found);
        Ok(self)
    }

    #[instrument(skip_all, fields(dcc = %self.dcc))]
    pub fn start(self, session: &Session) -> Result<Host, HostError> {
        let id = uuid::Uuid::new_v4().to_string();
        let mut host_types = vec![self.dcc.clone()];
        if self.dcc != UI_HOST_TYPE {
            host_types.push(UI_HOST_TYPE.to_string());
        }
        host_types.retain(|tag| !tag.is_empty());

        let compat = self.registry.compat().clone();
        let mut definitions = Vec::new();
        for definition in self.definitions {
            definition.validate()?;
            if compat.is_compatible(&definition.host_type, &host_types) {
                definitions.push(definition);
            } else {
                debug!(definition = %definition.name, "skipped, incompatible host type");
            }
        }

        let mut executor = PluginExecutor::new(id.clone())
            .with_main_thread_host_types(self.config.main_thread_host_types.clone())
            .with_store_snapshots(self.store_snapshots);
        if let Some(handle) = self.main_thread {
            executor = executor.with_main_thread(handle);
        }
        let resolver: Arc<dyn PluginResolver> = self.registry;
        let mut engines = HashMap::new();
        for definition in &definitions {
            engines.entry(definition.pipeline_type).or_insert_with(|| {
                EngineRunner::new(
                    definition.pipeline_type,
                    host_types.clone(),
                    Arc::clone(&resolver),
                    executor.clone(),
                )
                .with_finalizer_policy(self.finalizer_policy)
            });
        }

        let inner = Arc::new(HostInner {
            id,
            host_types,
            definitions,
            engines,
            hub: Arc::clone(session.hub()),
            history: Mutex::new(RunHistory::new(self.config.history_size)),
            multithreading: self.config.multithreading,
        });

        let hub = session.hub();
        let mut subscriptions = Vec::with_capacity(3);

        let discover = Arc::clone(&inner);
        subscriptions.push(hub.subscribe(&format!("topic={}", topics::DISCOVER), move |_| {
            serde_json::to_value(discover.info()).ok()
        })?);

        let runner = Arc::clone(&inner);
        subscriptions.push(hub.subscribe(&host_filter(topics::RUN, &inner.id), move |event| {
            HostInner::accept_run(&runner, event);
            None
        })?);

        let hooks = Arc::clone(&inner);
        subscriptions.push(hub.subscribe(&host_filter(topics::UI_HOOK, &inner.id), move |event| {
            serde_json::to_value(hooks.ui_hook(event)).ok()
        })?);

        info!(
            host_id = %inner.id,
            host_types = ?inner.host_types,
            definitions = inner.definitions.len(),
            "host registered"
        );
        Ok(Host {
            inner,
            subscriptions: Mutex::new(subscriptions),
        })
    }
}

struct HostInner {
    id: String,
    host_types: Vec<String>,
    definitions: Vec<PipelineDefinition>,
    engines: HashMap<PipelineType, EngineRunner>,
    hub: Arc<EventHub>,
    history: Mutex<RunHistory>,
    multithreading: bool,
}

impl HostInner {
    fn info(&self) -> HostInfo {
        HostInfo {
            host_id: self.id.clone(),
            host_types: self.host_types.clone(),
            definitions: self.definitions.iter().map(DefinitionSummary::from).collect(),
            framework_version: FRAMEWORK_VERSION.to_string(),
        }
    }

    fn accept_run(this: &Arc<Self>, event: &Event) {
        let request = match RunRequest::from_event(event) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, "malformed run request");
                return;
            }
        };
        if !this.multithreading {
            this.execute(request);
            return;
        }
        let worker = Arc::clone(this);
        let spawned = thread::Builder::new()
            .name("pipeline-run".into())
            .spawn(move || worker.execute(request));
        if let Err(e) = spawned {
            error!(error = %e, "could not start run thread");
        }
    }

    fn execute(&self, request: RunRequest) {
        info!(request_id = %request.request_id, pipeline_type = %request.pipeline_type, "run requested");
        let mut payload = RunResultPayload::new(&request);

        if request.pipeline_type == PipelineType::LogViewer {
            payload.history = self.lock_history().snapshot(request.definition.as_deref());
        } else {
            match self.run_definition(&request) {
                Ok(result) => {
                    self.lock_history()
                        .record(RunRecord::from_result(&result, request.request_id.clone()));
                    payload.result = Some(result);
                }
                Err(message) => {
                    error!(request_id = %request.request_id, %message, "run failed before plugins ran");
                    payload.error = Some(message);
                }
            }
        }

        match payload.to_event() {
            Ok(event) => {
                if let Err(e) = self.hub.publish(event) {
                    warn!(error = %e, request_id = %request.request_id, "could not publish run result");
                }
            }
            Err(e) => error!(error = %e, "could not serialize run result"),
        }
    }

    fn run_definition(&self, request: &RunRequest) -> Result<PipelineResult, String> {
        let definition = self.find_definition(request.pipeline_type, request.definition.as_deref())?;
        let engine = self
            .engines
            .get(&request.pipeline_type)
            .ok_or_else(|| format!("no {} engine on host {}", request.pipeline_type, self.id))?;
        engine
            .run_observed(definition, &request.options, &|item| {
                self.broadcast_item(&request.request_id, item)
            })
            .map_err(|e| e.to_string())
    }

    fn find_definition(&self, pipeline_type: PipelineType, name: Option<&str>) -> Result<&PipelineDefinition, String> {
        let mut candidates = self
            .definitions
            .iter()
            .filter(|d| d.pipeline_type == pipeline_type);
        match name {
            Some(name) => candidates
                .find(|d| d.name == name)
                .ok_or_else(|| format!("definition '{}' ({}) not found", name, pipeline_type)),
            None => candidates
                .next()
                .ok_or_else(|| format!("no {} definition on host", pipeline_type)),
        }
    }

    fn broadcast_item(&self, request_id: &str, item: &LogItem) {
        let notice = LogItemEvent {
            host_id: self.id.clone(),
            request_id: request_id.to_string(),
            log_item: item.clone(),
        };
        let Ok(data) = serde_json::to_value(&notice) else {
            return;
        };
        let mut topics_to_send = vec![topics::LOG_ITEM];
        if !item.boolean_status {
            topics_to_send.push(topics::DEBUG_INFORMATION);
        }
        for topic in topics_to_send {
            if let Err(e) = self.hub.publish(Event::new(topic, data.clone())) {
                debug!(error = %e, topic, "log item not broadcast");
            }
        }
    }

    fn ui_hook(&self, event: &Event) -> UiHookReply {
        let outcome = UiHookRequest::from_event(event)
            .map_err(|e| format!("malformed ui hook request: {}", e))
            .and_then(|request| {
                let definition = self.find_definition(request.pipeline_type, Some(request.definition.as_str()))?;
                let engine = self
                    .engines
                    .get(&request.pipeline_type)
                    .ok_or_else(|| format!("no {} engine on host", request.pipeline_type))?;
                engine
                    .run_ui_hook(definition, &request.plugin, request.payload)
                    .map_err(|failure| failure.to_string())
            });
        match outcome {
            Ok(result) => UiHookReply::Ok { result },
            Err(message) => {
                debug!(%message, "ui hook failed");
                UiHookReply::Failed { message }
            }
        }
    }

    fn lock_history(&self) -> std::sync::MutexGuard<'_, RunHistory> {
        self.history.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct Host {
    inner: Arc<HostInner>,
    subscriptions: Mutex<Vec<SubscriptionId>>,
}

impl Host {
    pub fn builder(dcc: impl Into<String>) -> HostBuilder {
        HostBuilder {
            dcc: dcc.into(),
            registry: Arc::new(PluginRegistry::new()),
            definitions: Vec::new(),
            config: FrameworkConfig::default(),
            main_thread: None,
            finalizer_policy: FinalizerPolicy::default(),
            store_snapshots: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn host_types(&self) -> &[String] {
        &self.inner.host_types
    }

    pub fn definitions(&self) -> &[PipelineDefinition] {
        &self.inner.definitions
    }

    pub fn info(&self) -> HostInfo {
        self.inner.info()
    }

    pub fn history(&self) -> Vec<RunRecord> {
        self.inner.lock_history().snapshot(None)
    }

    /// Runs a request in the calling thread without going through the hub.
    pub fn run_local(&self, request: RunRequest) -> Result<PipelineResult, String> {
        let result = self.inner.run_definition(&request)?;
        self.inner
            .lock_history()
            .record(RunRecord::from_result(&result, request.request_id.clone()));
        Ok(result)
    }

    pub fn is_registered(&self) -> bool {
        !self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Unsubscribes and announces the disconnect. Idempotent.
    pub fn shutdown(&self) {
        let subscriptions: Vec<SubscriptionId> = self
            .subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        if subscriptions.is_empty() {
            return;
        }
        for id in subscriptions {
            self.inner.hub.unsubscribe(id);
        }
        let notice = DisconnectNotice {
            host_id: self.inner.id.clone(),
        };
        let published = serde_json::to_value(&notice)
            .map_err(|e| e.to_string())
            .and_then(|data| {
                self.inner
                    .hub
                    .publish(Event::new(topics::DISCONNECT, data))
                    .map_err(|e| e.to_string())
            });
        if let Err(e) = published {
            debug!(error = %e, "disconnect notice not sent");
        }
        info!(host_id = %self.inner.id, "host shut down");
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

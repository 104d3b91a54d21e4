//! Plugin executor: runs exactly one plugin and produces exactly one LogItem.
use chrono::Utc;
use serde_json::{Map, Value};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use crate::definition::{PluginDefinition, Reference};
use crate::log_item::{round_seconds, LogItem};
use crate::main_thread::MainThreadHandle;
use crate::plugin::{Failure, FailureKind, FixAction, Plugin, PluginInput, PluginOutput};
use crate::status::Status;
use crate::store::Store;
use crate::validation::validate_output;

/// Outcome of one plugin invocation.
#[derive(Debug, Clone)]
pub struct PluginExecution {
    pub status: Status,
    pub log_item: LogItem,
    /// Value returned by the plugin, when it returned one.
    pub output: Option<Value>,
    /// Fix offered by a validation failure. Never applied automatically.
    pub fix: Option<FixAction>,
}

type Invocation = Result<Result<PluginOutput, Failure>, String>;

#[derive(Clone)]
pub struct PluginExecutor {
    host_id: String,
    main_thread: Option<MainThreadHandle>,
    main_thread_host_types: Vec<String>,
    snapshot_store: bool,
}

impl PluginExecutor {
    pub fn new(host_id: impl Into<String>) -> Self {
        Self {
            host_id: host_id.into(),
            main_thread: None,
            main_thread_host_types: Vec::new(),
            snapshot_store: false,
        }
    }

    pub fn with_main_thread(mut self, handle: MainThreadHandle) -> Self {
        self.main_thread = Some(handle);
        self
    }

    /// Host types whose plugins are always marshalled to the main thread.
    pub fn with_main_thread_host_types(mut self, host_types: Vec<String>) -> Self {
        self.main_thread_host_types = host_types;
        self
    }

    /// Attach a copy of the store to every LogItem.
    pub fn with_store_snapshots(mut self, enabled: bool) -> Self {
        self.snapshot_store = enabled;
        self
    }

    pub fn host_id(&self) -> &str {
        &self.host_id
    }

    /// Whether a call to `plugin` has to hop to the main thread right now.
    pub fn needs_main_thread(&self, plugin: &dyn Plugin) -> bool {
        let Some(handle) = &self.main_thread else {
            return false;
        };
        if handle.is_main_thread() {
            return false;
        }
        plugin.requires_main_thread()
            || plugin
                .host_types()
                .iter()
                .any(|ht| self.main_thread_host_types.contains(ht))
    }

    pub fn execute(
        &self,
        plugin: &Arc<dyn Plugin>,
        definition: &PluginDefinition,
        reference: &Reference,
        options: Map<String, Value>,
        store: &mut Store,
    ) -> PluginExecution {
        debug!(plugin = %definition.name, %reference, "executing plugin");
        let start = Instant::now();

        let invocation = match (&self.main_thread, self.needs_main_thread(plugin.as_ref())) {
            (Some(handle), true) => {
                let working = store.clone();
                let target = Arc::clone(plugin);
                let job_options = options.clone();
                let job_reference = reference.clone();
                let marshalled = handle.call(move || {
                    let mut working = working;
                    let result = invoke(target.as_ref(), &mut working, &job_options, &job_reference);
                    (working, result)
                });
                match marshalled {
                    Ok((updated, result)) => {
                        *store = updated;
                        result
                    }
                    Err(err) => Ok(Err(Failure::execution(format!(
                        "main thread hand-off failed: {}",
                        err
                    )))),
                }
            }
            _ => invoke(plugin.as_ref(), store, &options, reference),
        };

        let contract = definition
            .output
            .clone()
            .unwrap_or_else(|| plugin.output_contract());

        let mut fix = None;
        let mut output = None;
        let (status, message) = match invocation {
            Ok(Ok(result)) => {
                store.record(reference, &definition.name, result.value.clone());
                let verdict = validate_output(&contract, &result.value, &options);
                output = Some(result.value);
                match (verdict, result.warning) {
                    (Err(reason), _) => (Status::Error, Some(format!("invalid output: {}", reason))),
                    (Ok(()), Some(warning)) => (Status::Warning, Some(warning)),
                    (Ok(()), None) => (Status::Success, result.message),
                }
            }
            Ok(Err(failure)) => {
                let status = match failure.kind {
                    FailureKind::Validation => Status::Error,
                    FailureKind::Execution | FailureKind::UiHook => Status::Exception,
                };
                fix = failure.fix.clone();
                (status, Some(failure.to_string()))
            }
            Err(panic_message) => (
                Status::Exception,
                Some(format!("plugin panicked: {}", panic_message)),
            ),
        };

        let execution_time = round_seconds(start.elapsed().as_secs_f64());
        if status.is_ok() {
            debug!(plugin = %definition.name, execution_time, "plugin finished");
        } else {
            warn!(
                plugin = %definition.name,
                %status,
                message = message.as_deref().unwrap_or(""),
                "plugin did not succeed"
            );
        }

        let log_item = LogItem {
            date: Utc::now(),
            host_id: self.host_id.clone(),
            plugin_name: definition.name.clone(),
            plugin_kind: definition.kind,
            reference: reference.clone(),
            boolean_status: status.is_ok(),
            status,
            message,
            execution_time,
            options,
            store: self.snapshot_store.then(|| store.to_value()),
            store_digest: Some(store.digest()),
            fix_label: fix.as_ref().map(|f| f.label().to_string()),
        };

        PluginExecution {
            status,
            log_item,
            output,
            fix,
        }
    }

    /// Runs a plugin's ui hook under the same thread policy as `run`.
    pub fn execute_ui_hook(
        &self,
        plugin: &Arc<dyn Plugin>,
        payload: Value,
        options: Map<String, Value>,
    ) -> Result<Value, Failure> {
        if !plugin.has_ui_hook() {
            return Err(Failure::ui_hook(format!(
                "plugin '{}' does not expose a ui hook",
                plugin.name()
            )));
        }
        let hook = {
            let target = Arc::clone(plugin);
            move || {
                panic::catch_unwind(AssertUnwindSafe(|| target.ui_hook(&payload, &options)))
                    .map_err(|p| panic_message(p.as_ref()))
            }
        };
        let result = match (&self.main_thread, self.needs_main_thread(plugin.as_ref())) {
            (Some(handle), true) => handle
                .call(hook)
                .map_err(|e| Failure::ui_hook(format!("main thread hand-off failed: {}", e)))?,
            _ => hook(),
        };
        match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(failure)) => Err(Failure::ui_hook(failure.message)),
            Err(panic) => Err(Failure::ui_hook(format!("ui hook panicked: {}", panic))),
        }
    }
}

fn invoke(
    plugin: &dyn Plugin,
    store: &mut Store,
    options: &Map<String, Value>,
    reference: &Reference,
) -> Invocation {
    panic::catch_unwind(AssertUnwindSafe(|| {
        let mut input = PluginInput {
            store,
            options,
            reference,
        };
        plugin.run(&mut input)
    }))
    .map_err(|p| panic_message(p.as_ref()))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

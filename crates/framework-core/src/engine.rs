//! Engine runner: walks a pipeline definition step → stage → plugin,
//! strictly sequentially, against one fresh store per run.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::definition::{PipelineDefinition, PluginDefinition, Reference};
use crate::error::{CoreError, Result};
use crate::executor::PluginExecutor;
use crate::log_item::{round_seconds, LogItem};
use crate::plugin::{Failure, FixAction, Plugin};
use crate::status::PipelineType;
use crate::store::Store;

/// Looks up the implementation behind a plugin definition.
pub trait PluginResolver: Send + Sync {
    fn resolve(&self, definition: &PluginDefinition, host_types: &[String]) -> Option<Arc<dyn Plugin>>;
}

/// How finalizer-family failures count towards the overall run status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalizerPolicy {
    /// Finalizer failures are recorded but the run status only reflects
    /// the non-finalizer plugins.
    #[default]
    ReportOnly,
    /// Any finalizer failure fails the run.
    FailRun,
}

/// Run-time inputs: context values seeded into the store and per-plugin
/// option overrides keyed by plugin name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default)]
    pub plugins: HashMap<String, Map<String, Value>>,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    pub fn with_plugin_option(
        mut self,
        plugin: impl Into<String>,
        key: impl Into<String>,
        value: Value,
    ) -> Self {
        self.plugins
            .entry(plugin.into())
            .or_default()
            .insert(key.into(), value);
        self
    }

    /// Definition options overlaid with this run's overrides for `plugin`.
    pub fn resolve_for(&self, plugin: &PluginDefinition) -> Map<String, Value> {
        let mut options = plugin.options.clone();
        if let Some(overrides) = self.plugins.get(&plugin.name) {
            for (key, value) in overrides {
                options.insert(key.clone(), value.clone());
            }
        }
        options
    }
}

/// A fix surfaced by a failed validator, kept for an explicit user action.
#[derive(Debug, Clone)]
pub struct PendingFix {
    pub plugin_name: String,
    pub reference: Reference,
    pub action: FixAction,
}

/// Aggregated result of one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub run_id: String,
    pub host_id: String,
    pub definition: String,
    pub pipeline_type: PipelineType,
    /// AND over the non-finalizer results (see [`FinalizerPolicy`]).
    pub status: bool,
    pub log_items: Vec<LogItem>,
    /// Plugin whose failure stopped the run, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub halted_at: Option<Reference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    pub execution_time: f64,
    #[serde(default)]
    pub store: Store,
    #[serde(skip)]
    pub fixes: Vec<PendingFix>,
}

impl PipelineResult {
    pub fn failed_items(&self) -> impl Iterator<Item = &LogItem> {
        self.log_items.iter().filter(|item| !item.boolean_status)
    }
}

pub struct EngineRunner {
    pipeline_type: PipelineType,
    host_types: Vec<String>,
    resolver: Arc<dyn PluginResolver>,
    executor: PluginExecutor,
    policy: FinalizerPolicy,
}

impl EngineRunner {
    pub fn new(
        pipeline_type: PipelineType,
        host_types: Vec<String>,
        resolver: Arc<dyn PluginResolver>,
        executor: PluginExecutor,
    ) -> Self {
        Self {
            pipeline_type,
            host_types,
            resolver,
            executor,
            policy: FinalizerPolicy::default(),
        }
    }

    pub fn with_finalizer_policy(mut self, policy: FinalizerPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn pipeline_type(&self) -> PipelineType {
        self.pipeline_type
    }

    pub fn host_id(&self) -> &str {
        self.executor.host_id()
    }

    pub fn run(&self, definition: &PipelineDefinition, options: &RunOptions) -> Result<PipelineResult> {
        self.run_observed(definition, options, &|_| {})
    }

    /// Runs the pipeline, handing every LogItem to `observer` as soon as it
    /// is produced.
    #[instrument(skip_all, fields(definition = %definition.name, host_id = %self.executor.host_id()))]
    pub fn run_observed(
        &self,
        definition: &PipelineDefinition,
        options: &RunOptions,
        observer: &dyn Fn(&LogItem),
    ) -> Result<PipelineResult> {
        if definition.pipeline_type != self.pipeline_type {
            return Err(CoreError::definition(format!(
                "definition '{}' is a {} pipeline, engine runs {}",
                definition.name, definition.pipeline_type, self.pipeline_type
            )));
        }
        definition.validate()?;
        let plan = self.resolve_plan(definition)?;

        let run_id = uuid::Uuid::new_v4().to_string();
        info!(%run_id, plugins = plan.len(), "pipeline run started");
        let start = Instant::now();

        let mut store = Store::with_context(&options.context);
        let mut log_items = Vec::with_capacity(plan.len());
        let mut fixes = Vec::new();
        let mut status = true;
        let mut halted_at: Option<Reference> = None;
        let mut first_failure: Option<String> = None;

        for (reference, plugin_definition, plugin) in plan {
            let finalizer = plugin_definition.kind.is_finalizer_family();
            if halted_at.is_some() && !finalizer {
                debug!(plugin = %plugin_definition.name, "skipped after halt");
                continue;
            }

            let plugin_options = options.resolve_for(plugin_definition);
            let execution = self.executor.execute(
                &plugin,
                plugin_definition,
                &reference,
                plugin_options,
                &mut store,
            );
            observer(&execution.log_item);

            if !execution.status.is_ok() {
                let counts = !finalizer || self.policy == FinalizerPolicy::FailRun;
                if counts {
                    status = false;
                    if first_failure.is_none() {
                        first_failure = Some(
                            execution
                                .log_item
                                .message
                                .clone()
                                .unwrap_or_else(|| execution.status.label().to_string()),
                        );
                    }
                }
                if !finalizer {
                    warn!(plugin = %plugin_definition.name, %reference, "halting, running finalizers only");
                    halted_at = Some(reference.clone());
                }
            }

            if let Some(action) = execution.fix {
                fixes.push(PendingFix {
                    plugin_name: plugin_definition.name.clone(),
                    reference,
                    action,
                });
            }
            log_items.push(execution.log_item);
        }

        let execution_time = round_seconds(start.elapsed().as_secs_f64());
        info!(%run_id, status, execution_time, "pipeline run finished");

        Ok(PipelineResult {
            run_id,
            host_id: self.executor.host_id().to_string(),
            definition: definition.name.clone(),
            pipeline_type: definition.pipeline_type,
            status,
            log_items,
            halted_at,
            first_failure,
            execution_time,
            store,
            fixes,
        })
    }

    /// Runs the ui hook of one plugin of `definition`.
    pub fn run_ui_hook(
        &self,
        definition: &PipelineDefinition,
        plugin_name: &str,
        payload: Value,
    ) -> std::result::Result<Value, Failure> {
        let plugin_definition = definition
            .plugins()
            .map(|(_, p)| p)
            .find(|p| p.name == plugin_name)
            .ok_or_else(|| {
                Failure::ui_hook(format!(
                    "plugin '{}' is not part of '{}'",
                    plugin_name, definition.name
                ))
            })?;
        let plugin = self
            .resolver
            .resolve(plugin_definition, &self.host_types)
            .ok_or_else(|| {
                Failure::ui_hook(format!("plugin '{}' is not registered", plugin_definition.plugin_id()))
            })?;
        self.executor
            .execute_ui_hook(&plugin, payload, plugin_definition.options.clone())
    }

    fn resolve_plan<'d>(
        &self,
        definition: &'d PipelineDefinition,
    ) -> Result<Vec<(Reference, &'d PluginDefinition, Arc<dyn Plugin>)>> {
        definition
            .plugins()
            .filter(|(_, p)| p.enabled)
            .map(|(reference, p)| {
                self.resolver
                    .resolve(p, &self.host_types)
                    .map(|plugin| (reference, p, plugin))
                    .ok_or_else(|| CoreError::PluginNotFound {
                        name: p.plugin_id().to_string(),
                        host_types: self.host_types.join(","),
                    })
            })
            .collect()
    }
}

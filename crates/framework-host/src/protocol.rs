//! Wire protocol between hosts and clients: topics and payloads.
//!
//! Every host-addressed request carries its routing data under
//! `data.pipeline`, so hosts subscribe with
//! `topic=<topic> and data.pipeline.host_id=<id>`.
use framework_core::{LogItem, PipelineDefinition, PipelineResult, PipelineType, RunOptions};
use framework_event::Event;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::history::RunRecord;

pub mod topics {
    pub const DISCOVER: &str = "ftrack.pipeline.host.discover";
    pub const RUN: &str = "ftrack.pipeline.host.run";
    pub const RUN_RESULT: &str = "ftrack.pipeline.host.run.result";
    pub const UI_HOOK: &str = "ftrack.pipeline.host.ui_hook";
    pub const LOG_ITEM: &str = "ftrack.pipeline.host.log_item";
    pub const DISCONNECT: &str = "ftrack.pipeline.host.disconnect";
    pub const DEBUG_INFORMATION: &str = "ftrack.pipeline.plugin.debug-information";
}

/// Filter expression for requests addressed to one host.
pub fn host_filter(topic: &str, host_id: &str) -> String {
    format!("topic={} and data.pipeline.host_id={}", topic, host_id)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefinitionSummary {
    pub name: String,
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    #[serde(default)]
    pub host_type: Vec<String>,
    pub plugins: usize,
}

impl From<&PipelineDefinition> for DefinitionSummary {
    fn from(definition: &PipelineDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            pipeline_type: definition.pipeline_type,
            host_type: definition.host_type.clone(),
            plugins: definition.plugin_count(),
        }
    }
}

/// Discovery reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostInfo {
    pub host_id: String,
    pub host_types: Vec<String>,
    pub definitions: Vec<DefinitionSummary>,
    pub framework_version: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRequest {
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    pub host_id: String,
    pub request_id: String,
    /// Definition name; the host's first definition of the type otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,
    #[serde(default)]
    pub options: RunOptions,
}

impl RunRequest {
    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        Ok(Event::new(topics::RUN, json!({ "pipeline": serde_json::to_value(self)? })))
    }

    pub fn from_event(event: &Event) -> Result<Self, serde_json::Error> {
        serde_json::from_value(event.data.get("pipeline").cloned().unwrap_or(Value::Null))
    }
}

/// Published on [`topics::RUN_RESULT`] once a request is finished.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResultPayload {
    pub request_id: String,
    pub host_id: String,
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<PipelineResult>,
    /// Answer to a `log_viewer` request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub history: Vec<RunRecord>,
    /// The request could not be run at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RunResultPayload {
    pub fn new(request: &RunRequest) -> Self {
        Self {
            request_id: request.request_id.clone(),
            host_id: request.host_id.clone(),
            pipeline_type: request.pipeline_type,
            result: None,
            history: Vec::new(),
            error: None,
        }
    }

    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        Ok(Event::new(topics::RUN_RESULT, serde_json::to_value(self)?))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiHookRequest {
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    pub host_id: String,
    pub definition: String,
    pub plugin: String,
    #[serde(default)]
    pub payload: Value,
}

impl UiHookRequest {
    pub fn new(
        host_id: impl Into<String>,
        pipeline_type: PipelineType,
        definition: impl Into<String>,
        plugin: impl Into<String>,
    ) -> Self {
        Self {
            pipeline_type,
            host_id: host_id.into(),
            definition: definition.into(),
            plugin: plugin.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    pub fn to_event(&self) -> Result<Event, serde_json::Error> {
        Ok(Event::new(topics::UI_HOOK, json!({ "pipeline": serde_json::to_value(self)? })))
    }

    pub fn from_event(event: &Event) -> Result<Self, serde_json::Error> {
        serde_json::from_value(event.data.get("pipeline").cloned().unwrap_or(Value::Null))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UiHookReply {
    Ok { result: Value },
    Failed { message: String },
}

/// Broadcast on [`topics::LOG_ITEM`] and, for failures, on
/// [`topics::DEBUG_INFORMATION`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogItemEvent {
    pub host_id: String,
    pub request_id: String,
    pub log_item: LogItem,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisconnectNotice {
    pub host_id: String,
}

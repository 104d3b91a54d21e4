//! Client-side record of a discovered host.
use chrono::{DateTime, Utc};
use framework_core::PipelineType;
use serde::{Deserialize, Serialize};

use crate::protocol::{DefinitionSummary, HostInfo};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConnection {
    pub host_id: String,
    pub host_types: Vec<String>,
    pub definitions: Vec<DefinitionSummary>,
    pub framework_version: String,
    pub last_seen: DateTime<Utc>,
}

impl HostConnection {
    pub fn from_info(info: HostInfo) -> Self {
        Self {
            host_id: info.host_id,
            host_types: info.host_types,
            definitions: info.definitions,
            framework_version: info.framework_version,
            last_seen: Utc::now(),
        }
    }

    /// The DCC tag, i.e. the first host type that is not the UI tag.
    pub fn dcc(&self) -> Option<&str> {
        self.host_types
            .iter()
            .map(String::as_str)
            .find(|tag| *tag != crate::host::UI_HOST_TYPE)
    }

    pub fn supports(&self, pipeline_type: PipelineType) -> bool {
        pipeline_type == PipelineType::LogViewer
            || self.definitions.iter().any(|d| d.pipeline_type == pipeline_type)
    }

    pub fn definitions_of(&self, pipeline_type: PipelineType) -> impl Iterator<Item = &DefinitionSummary> {
        self.definitions
            .iter()
            .filter(move |d| d.pipeline_type == pipeline_type)
    }

    pub fn definition(&self, name: &str) -> Option<&DefinitionSummary> {
        self.definitions.iter().find(|d| d.name == name)
    }
}

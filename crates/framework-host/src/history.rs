//! Bounded run history, answered to `log_viewer` requests.
use chrono::{DateTime, Utc};
use framework_core::{LogItem, PipelineResult, PipelineType};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One finished run, without its store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: String,
    pub request_id: String,
    pub definition: String,
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    pub status: bool,
    pub finished: DateTime<Utc>,
    pub execution_time: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_failure: Option<String>,
    pub log_items: Vec<LogItem>,
}

impl RunRecord {
    pub fn from_result(result: &PipelineResult, request_id: impl Into<String>) -> Self {
        Self {
            run_id: result.run_id.clone(),
            request_id: request_id.into(),
            definition: result.definition.clone(),
            pipeline_type: result.pipeline_type,
            status: result.status,
            finished: Utc::now(),
            execution_time: result.execution_time,
            first_failure: result.first_failure.clone(),
            log_items: result.log_items.clone(),
        }
    }
}

pub struct RunHistory {
    entries: VecDeque<RunRecord>,
    max_entries: usize,
}

impl RunHistory {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries.min(64)),
            max_entries,
        }
    }

    /// Appends a run, dropping the oldest ones beyond the limit.
    pub fn record(&mut self, record: RunRecord) {
        if self.max_entries == 0 {
            return;
        }
        self.entries.push_back(record);
        while self.entries.len() > self.max_entries {
            self.entries.pop_front();
        }
    }

    /// Oldest first.
    pub fn entries(&self) -> impl Iterator<Item = &RunRecord> {
        self.entries.iter()
    }

    pub fn for_definition(&self, definition: &str) -> Vec<RunRecord> {
        self.entries
            .iter()
            .filter(|r| r.definition == definition)
            .cloned()
            .collect()
    }

    pub fn failed(&self) -> Vec<&RunRecord> {
        self.entries.iter().filter(|r| !r.status).collect()
    }

    pub fn snapshot(&self, definition: Option<&str>) -> Vec<RunRecord> {
        match definition {
            Some(name) => self.for_definition(name),
            None => self.entries.iter().cloned().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for RunHistory {
    fn default() -> Self {
        Self::new(50)
    }
}

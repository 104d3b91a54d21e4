//! LogItem: one plugin invocation's structured record.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::definition::Reference;
use crate::status::{PluginKind, Status};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogItem {
    pub date: DateTime<Utc>,
    pub host_id: String,
    pub plugin_name: String,
    pub plugin_kind: PluginKind,
    pub reference: Reference,
    pub boolean_status: bool,
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Seconds, rounded to 4 decimals.
    pub execution_time: f64,
    #[serde(default)]
    pub options: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_digest: Option<String>,
    /// Label of the fix the UI may offer, if the plugin attached one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_label: Option<String>,
}

impl LogItem {
    /// Whether this item came from a finalizer-family plugin.
    pub fn is_finalizer(&self) -> bool {
        self.plugin_kind.is_finalizer_family()
    }

    /// One-line rendering used by clients and the CLI.
    pub fn summary(&self) -> String {
        let mut line = format!(
            "[{}] {} {} ({:.4}s)",
            self.status.label(),
            self.reference,
            self.plugin_name,
            self.execution_time
        );
        if let Some(message) = &self.message {
            line.push_str(": ");
            line.push_str(message);
        }
        line
    }
}

/// Rounds seconds to 4 decimals.
pub fn round_seconds(seconds: f64) -> f64 {
    (seconds * 10_000.0).round() / 10_000.0
}

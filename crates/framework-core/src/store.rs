//! Store: shared mutable state for one pipeline run.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::definition::Reference;

/// Key under which per-step/per-stage plugin results are kept.
pub const COMPONENTS_KEY: &str = "components";

/// Top-level context keys understood by the standard context plugins.
pub const CONTEXT_KEYS: [&str; 4] = ["context_id", "asset_name", "comment", "status_id"];

/// Mapping of string keys to JSON values, owned by exactly one run.
///
/// Results are recorded under `components.<step>.<stage>.<plugin>`; other
/// keys are pipeline-wide (`context_id`, `asset_name`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Store {
    values: Map<String, Value>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with run context values.
    pub fn with_context(context: &Map<String, Value>) -> Self {
        let mut store = Self::new();
        for (key, value) in context {
            store.values.insert(key.clone(), value.clone());
        }
        store
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(Value::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The `components` namespace, if any plugin has recorded a result.
    pub fn components(&self) -> Option<&Map<String, Value>> {
        self.values.get(COMPONENTS_KEY).and_then(Value::as_object)
    }

    /// Mutable access to one component (step) mapping, created on demand.
    pub fn component_mut(&mut self, name: &str) -> &mut Map<String, Value> {
        let components = object_entry(&mut self.values, COMPONENTS_KEY);
        object_entry(components, name)
    }

    /// Records a plugin's returned value at its reference.
    pub fn record(&mut self, reference: &Reference, plugin: &str, value: Value) {
        let stage = object_entry(self.component_mut(&reference.step), &reference.stage);
        stage.insert(plugin.to_string(), value);
    }

    /// Results recorded for one stage of one step, in recording order.
    pub fn stage_results(&self, step: &str, stage: &str) -> Vec<(&str, &Value)> {
        self.components()
            .and_then(|c| c.get(step))
            .and_then(Value::as_object)
            .and_then(|s| s.get(stage))
            .and_then(Value::as_object)
            .map(|plugins| plugins.iter().map(|(k, v)| (k.as_str(), v)).collect())
            .unwrap_or_default()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.values
    }

    pub fn to_value(&self) -> Value {
        Value::Object(self.values.clone())
    }

    /// Content digest of the serialized store (`blake3:<hex>`).
    pub fn digest(&self) -> String {
        let bytes = serde_json::to_vec(&self.values).unwrap_or_default();
        format!("blake3:{}", blake3::hash(&bytes))
    }
}

fn object_entry<'a>(map: &'a mut Map<String, Value>, key: &str) -> &'a mut Map<String, Value> {
    let entry = map
        .entry(key.to_string())
        .or_insert_with(|| Value::Object(Map::new()));
    if !entry.is_object() {
        *entry = Value::Object(Map::new());
    }
    match entry {
        Value::Object(inner) => inner,
        _ => unreachable!("entry was just replaced with an object"),
    }
}

//! Context plugin: resolves where a publish goes.
use framework_core::{Failure, Plugin, PluginInput, PluginKind, PluginOutput, CONTEXT_KEYS};
use serde_json::{Map, Value};

/// Reads the context keys from the plugin options, falling back to the
/// run context seeded into the store, and writes the resolved values back
/// to the store root so later steps see them.
#[derive(Debug, Default)]
pub struct ContextPlugin;

impl ContextPlugin {
    fn resolve(&self, lookup: impl Fn(&str) -> Value) -> Map<String, Value> {
        CONTEXT_KEYS
            .iter()
            .map(|key| (key.to_string(), lookup(key)))
            .collect()
    }
}

impl Plugin for ContextPlugin {
    fn name(&self) -> &str {
        "context"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Context
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        let context = self.resolve(|key| input.context_value(key));
        if context.get("context_id").map_or(true, Value::is_null) {
            return Err(Failure::validation("no context_id in options or run context"));
        }
        for (key, value) in &context {
            input.store.set(key.clone(), value.clone());
        }
        Ok(Value::Object(context).into())
    }

    fn has_ui_hook(&self) -> bool {
        true
    }

    /// Previews the context the plugin would resolve, with `payload`
    /// entries taking precedence over the options.
    fn ui_hook(&self, payload: &Value, options: &Map<String, Value>) -> Result<Value, Failure> {
        let overrides = match payload {
            Value::Null => Map::new(),
            Value::Object(map) => map.clone(),
            other => {
                return Err(Failure::ui_hook(format!(
                    "expected an object payload, got {}",
                    other
                )))
            }
        };
        let preview = self.resolve(|key| {
            overrides
                .get(key)
                .or_else(|| options.get(key))
                .cloned()
                .unwrap_or(Value::Null)
        });
        Ok(Value::Object(preview))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framework_core::{Reference, Store};
    use serde_json::json;

    #[test]
    fn test_options_win_over_store_context() {
        let mut store = Store::with_context(json!({"context_id": "task-1", "comment": "wip"}).as_object().unwrap());
        let options = json!({"context_id": "task-2", "asset_name": "hero"});
        let reference = Reference::new("context", "context");
        let mut input = PluginInput {
            store: &mut store,
            options: options.as_object().unwrap(),
            reference: &reference,
        };

        let output = ContextPlugin.run(&mut input).unwrap();
        assert_eq!(output.value["context_id"], json!("task-2"));
        assert_eq!(output.value["comment"], json!("wip"));
        assert_eq!(output.value["status_id"], Value::Null);
        assert_eq!(store.get_str("asset_name"), Some("hero"));

        let keys: Vec<&str> = output.value.as_object().unwrap().keys().map(String::as_str).collect();
        assert_eq!(keys, CONTEXT_KEYS.to_vec());
    }

    #[test]
    fn test_missing_context_id_is_a_validation_failure() {
        let mut store = Store::new();
        let options = Map::new();
        let reference = Reference::new("context", "context");
        let mut input = PluginInput {
            store: &mut store,
            options: &options,
            reference: &reference,
        };
        let failure = ContextPlugin.run(&mut input).unwrap_err();
        assert_eq!(failure.kind, framework_core::FailureKind::Validation);
    }

    #[test]
    fn test_ui_hook_previews_overrides() {
        let options = json!({"context_id": "task-1", "asset_name": "hero"});
        let preview = ContextPlugin
            .ui_hook(&json!({"asset_name": "villain"}), options.as_object().unwrap())
            .unwrap();
        assert_eq!(preview["context_id"], json!("task-1"));
        assert_eq!(preview["asset_name"], json!("villain"));
        assert!(ContextPlugin.ui_hook(&json!([1]), &Map::new()).is_err());
    }
}

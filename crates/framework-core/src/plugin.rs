//! Plugin trait: the single contract every unit of work implements.
//!
//! DCC specificity is a constructor concern of the implementing type; the
//! engine only sees `kind`, `host_types` and the capability set
//! `{run, ui_hook}`.
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::fmt;
use std::sync::Arc;

use crate::definition::Reference;
use crate::status::PluginKind;
use crate::store::Store;

/// Host type tag matching every host.
pub const COMMON_HOST_TYPE: &str = "common";

/// What the engine hands to [`Plugin::run`].
pub struct PluginInput<'a> {
    pub store: &'a mut Store,
    pub options: &'a Map<String, Value>,
    pub reference: &'a Reference,
}

impl<'a> PluginInput<'a> {
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(Value::as_str)
    }

    /// Context value from the options first, then from the store.
    pub fn context_value(&self, key: &str) -> Value {
        self.options
            .get(key)
            .or_else(|| self.store.get(key))
            .cloned()
            .unwrap_or(Value::Null)
    }

    /// Results of the earlier stages of the current step, in stage order.
    /// List results are flattened into their items.
    pub fn data(&self) -> Vec<Value> {
        let mut data = Vec::new();
        let stages = self
            .store
            .components()
            .and_then(|c| c.get(&self.reference.step))
            .and_then(Value::as_object);
        let Some(stages) = stages else {
            return data;
        };
        for (stage, plugins) in stages {
            if stage == &self.reference.stage {
                continue;
            }
            let Some(plugins) = plugins.as_object() else {
                continue;
            };
            for value in plugins.values() {
                match value {
                    Value::Array(items) => data.extend(items.iter().cloned()),
                    other => data.push(other.clone()),
                }
            }
        }
        data
    }
}

/// Successful return of a plugin.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginOutput {
    pub value: Value,
    pub message: Option<String>,
    /// Set when the plugin finished but wants a WARNING status.
    pub warning: Option<String>,
}

impl PluginOutput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            message: None,
            warning: None,
        }
    }

    pub fn warning(value: Value, message: impl Into<String>) -> Self {
        Self {
            value,
            message: None,
            warning: Some(message.into()),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl From<Value> for PluginOutput {
    fn from(value: Value) -> Self {
        Self::new(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Business-rule check failed; maps to ERROR.
    Validation,
    /// Side effect failed; maps to EXCEPTION.
    Execution,
    /// A `ui_hook` call failed; only reported to the hook caller.
    UiHook,
}

type FixFn = dyn Fn(&mut Store, &Map<String, Value>) -> Result<(), Failure> + Send + Sync;

/// A user-triggered remedy attached to a validation failure.
#[derive(Clone)]
pub struct FixAction {
    label: String,
    action: Arc<FixFn>,
}

impl FixAction {
    pub fn new<F>(label: impl Into<String>, action: F) -> Self
    where
        F: Fn(&mut Store, &Map<String, Value>) -> Result<(), Failure> + Send + Sync + 'static,
    {
        Self {
            label: label.into(),
            action: Arc::new(action),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Applies the fix. Never called by the engine itself.
    pub fn apply(&self, store: &mut Store, options: &Map<String, Value>) -> Result<(), Failure> {
        (self.action)(store, options)
    }
}

impl fmt::Debug for FixAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixAction").field("label", &self.label).finish()
    }
}

/// Tagged failure returned by plugins instead of raising.
#[derive(Debug, Clone)]
pub struct Failure {
    pub kind: FailureKind,
    pub message: String,
    pub fix: Option<FixAction>,
}

impl Failure {
    pub fn validation(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Validation,
            message: message.into(),
            fix: None,
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Execution,
            message: message.into(),
            fix: None,
        }
    }

    pub fn ui_hook(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::UiHook,
            message: message.into(),
            fix: None,
        }
    }

    pub fn with_fix(mut self, fix: FixAction) -> Self {
        self.fix = Some(fix);
        self
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Validation => write!(f, "PLUGIN/VALIDATION: {}", self.message),
            FailureKind::Execution => write!(f, "PLUGIN/EXEC: {}", self.message),
            FailureKind::UiHook => write!(f, "PLUGIN/UI_HOOK: {}", self.message),
        }
    }
}

impl std::error::Error for Failure {}

/// Expected JSON shape of a plugin's returned value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Any,
    Null,
    Bool,
    Number,
    String,
    List,
    Dict,
}

impl OutputType {
    pub fn matches(self, value: &Value) -> bool {
        match self {
            OutputType::Any => true,
            OutputType::Null => value.is_null(),
            OutputType::Bool => value.is_boolean(),
            OutputType::Number => value.is_number(),
            OutputType::String => value.is_string(),
            OutputType::List => value.is_array(),
            OutputType::Dict => value.is_object(),
        }
    }

    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => OutputType::Null,
            Value::Bool(_) => OutputType::Bool,
            Value::Number(_) => OutputType::Number,
            Value::String(_) => OutputType::String,
            Value::Array(_) => OutputType::List,
            Value::Object(_) => OutputType::Dict,
        }
    }
}

/// Declared output type plus an optional template value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputContract {
    #[serde(rename = "type")]
    pub output_type: OutputType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl OutputContract {
    pub fn any() -> Self {
        Self::of(OutputType::Any)
    }

    pub fn of(output_type: OutputType) -> Self {
        Self {
            output_type,
            value: None,
        }
    }

    pub fn with_value(mut self, value: Value) -> Self {
        self.value = Some(value);
        self
    }

    /// Conventional contract for each plugin kind.
    pub fn for_kind(kind: PluginKind) -> Self {
        match kind {
            PluginKind::Context => Self::of(OutputType::Dict).with_value(json!({
                "context_id": null,
                "asset_name": null,
                "comment": null,
                "status_id": null,
            })),
            PluginKind::Collector | PluginKind::Exporter => Self::of(OutputType::List),
            PluginKind::Validator => Self::of(OutputType::Bool).with_value(Value::Bool(true)),
            PluginKind::Importer
            | PluginKind::PostImporter
            | PluginKind::PreFinalizer
            | PluginKind::Finalizer
            | PluginKind::PostFinalizer => Self::of(OutputType::Dict),
            PluginKind::Discover
            | PluginKind::Resolver
            | PluginKind::Action
            | PluginKind::Generic => Self::any(),
        }
    }
}

/// One reusable unit of work.
///
/// `run` must not assume a thread. Plugins that need a main-thread-only DCC
/// API return `true` from [`Plugin::requires_main_thread`] and let the
/// executor do the hop.
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> PluginKind;

    fn host_types(&self) -> Vec<String> {
        vec![COMMON_HOST_TYPE.to_string()]
    }

    fn requires_main_thread(&self) -> bool {
        false
    }

    fn output_contract(&self) -> OutputContract {
        OutputContract::for_kind(self.kind())
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure>;

    fn has_ui_hook(&self) -> bool {
        false
    }

    /// Side-effect-free live query from the UI.
    fn ui_hook(&self, _payload: &Value, _options: &Map<String, Value>) -> Result<Value, Failure> {
        Err(Failure::ui_hook(format!(
            "plugin '{}' does not expose a ui hook",
            self.name()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_flattens_earlier_stages() {
        let mut store = Store::new();
        let collector = Reference::new("components", "collector");
        store.record(&collector, "a", json!(["one", "two"]));
        store.record(&collector, "b", json!({"path": "/tmp/x"}));
        let validator = Reference::new("components", "validator");
        store.record(&validator, "earlier_validator", json!(true));

        let options = Map::new();
        let input = PluginInput {
            store: &mut store,
            options: &options,
            reference: &validator,
        };
        assert_eq!(
            input.data(),
            vec![json!("one"), json!("two"), json!({"path": "/tmp/x"})]
        );
    }

    #[test]
    fn test_fix_action_is_explicit() {
        let fix = FixAction::new("create folder", |store: &mut Store, _: &Map<String, Value>| {
            store.set("fixed", json!(true));
            Ok(())
        });
        let failure = Failure::validation("folder missing").with_fix(fix);
        assert_eq!(failure.to_string(), "PLUGIN/VALIDATION: folder missing");

        let mut store = Store::new();
        assert!(!store.contains_key("fixed"));
        failure.fix.as_ref().unwrap().apply(&mut store, &Map::new()).unwrap();
        assert_eq!(store.get("fixed"), Some(&json!(true)));
    }

    #[test]
    fn test_output_type_matching() {
        assert!(OutputType::List.matches(&json!([])));
        assert!(!OutputType::Dict.matches(&json!([])));
        assert!(OutputType::Any.matches(&Value::Null));
        assert_eq!(OutputType::of(&json!(false)), OutputType::Bool);
    }

    #[test]
    fn test_validator_contract_expects_true() {
        let contract = OutputContract::for_kind(PluginKind::Validator);
        assert_eq!(contract.output_type, OutputType::Bool);
        assert_eq!(contract.value, Some(Value::Bool(true)));
    }
}

//! Validators: pass/fail checks over the collected items.
use framework_core::{Failure, FixAction, Plugin, PluginInput, PluginKind, PluginOutput, Store};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::path::Path;

/// Fails when the earlier stages of the step produced nothing.
#[derive(Debug, Default)]
pub struct NonEmptyValidator;

impl Plugin for NonEmptyValidator {
    fn name(&self) -> &str {
        "non_empty_validator"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Validator
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        if input.data().iter().any(is_item) {
            Ok(json!(true).into())
        } else {
            Err(Failure::validation(format!(
                "nothing collected for {}",
                input.reference.step
            )))
        }
    }
}

/// Checks that every collected path exists. The failure carries a fix that
/// drops the missing paths from the step's results.
#[derive(Debug, Default)]
pub struct FileExistsValidator;

impl Plugin for FileExistsValidator {
    fn name(&self) -> &str {
        "file_exists_validator"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Validator
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        let missing: BTreeSet<String> = input
            .data()
            .iter()
            .filter_map(Value::as_str)
            .filter(|path| !Path::new(path).exists())
            .map(str::to_string)
            .collect();
        if missing.is_empty() {
            return Ok(json!(true).into());
        }

        let message = format!(
            "missing file(s): {}",
            missing.iter().cloned().collect::<Vec<_>>().join(", ")
        );
        let step = input.reference.step.clone();
        let fix = FixAction::new("Drop missing files", move |store: &mut Store, _options| {
            drop_paths(store, &step, &missing);
            Ok(())
        });
        Err(Failure::validation(message).with_fix(fix))
    }
}

fn is_item(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

fn drop_paths(store: &mut Store, step: &str, missing: &BTreeSet<String>) {
    for stage in store.component_mut(step).values_mut() {
        let Some(plugins) = stage.as_object_mut() else {
            continue;
        };
        for value in plugins.values_mut() {
            if let Value::Array(items) = value {
                items.retain(|item| item.as_str().map_or(true, |p| !missing.contains(p)));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framework_core::Reference;
    use serde_json::Map;

    fn store_with(collected: Value) -> Store {
        let mut store = Store::new();
        store.record(&Reference::new("components", "collector"), "file_collector", collected);
        store
    }

    fn validate(plugin: &dyn Plugin, store: &mut Store) -> Result<PluginOutput, Failure> {
        let options = Map::new();
        let reference = Reference::new("components", "validator");
        let mut input = PluginInput {
            store,
            options: &options,
            reference: &reference,
        };
        plugin.run(&mut input)
    }

    #[test]
    fn test_non_empty() {
        let mut empty = store_with(json!([]));
        assert!(validate(&NonEmptyValidator, &mut empty).is_err());
        let mut full = store_with(json!(["/tmp/a.mb"]));
        assert_eq!(validate(&NonEmptyValidator, &mut full).unwrap().value, json!(true));
    }

    #[test]
    fn test_missing_files_fail_with_fix() {
        let dir = tempfile::tempdir().unwrap();
        let present = dir.path().join("scene.mb");
        std::fs::write(&present, b"maya").unwrap();
        let present = present.display().to_string();
        let absent = dir.path().join("gone.mb").display().to_string();
        let mut store = store_with(json!([present.clone(), absent.clone()]));

        let failure = validate(&FileExistsValidator, &mut store).unwrap_err();
        assert!(failure.message.contains("gone.mb"));
        let fix = failure.fix.unwrap();
        assert_eq!(fix.label(), "Drop missing files");

        fix.apply(&mut store, &Map::new()).unwrap();
        assert_eq!(
            store.stage_results("components", "collector"),
            vec![("file_collector", &json!([present]))]
        );
        assert!(validate(&FileExistsValidator, &mut store).is_ok());
    }
}

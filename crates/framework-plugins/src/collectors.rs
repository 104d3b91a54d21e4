//! Collectors: gather the items a step works on.
use framework_core::{Failure, Plugin, PluginInput, PluginKind, PluginOutput};
use serde_json::{json, Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Returns the `items` option unchanged. Useful when the UI already knows
/// what to publish.
#[derive(Debug, Default)]
pub struct PassthroughCollector;

impl Plugin for PassthroughCollector {
    fn name(&self) -> &str {
        "passthrough_collector"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Collector
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        match input.option("items") {
            None => Ok(json!([]).into()),
            Some(Value::Array(items)) => Ok(Value::Array(items.clone()).into()),
            Some(other) => Err(Failure::validation(format!("'items' must be a list, got {}", other))),
        }
    }

    fn has_ui_hook(&self) -> bool {
        true
    }

    /// Items containing `payload.filter`, or all of them.
    fn ui_hook(&self, payload: &Value, options: &Map<String, Value>) -> Result<Value, Failure> {
        let items = options
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(needle) = payload.get("filter").and_then(Value::as_str) else {
            return Ok(Value::Array(items));
        };
        let matching = items
            .into_iter()
            .filter(|item| item.as_str().map_or(false, |s| s.contains(needle)))
            .collect();
        Ok(Value::Array(matching))
    }
}

/// Collects file paths from the `path` / `paths` options, optionally
/// restricted to `extensions`. Paths that do not exist are kept for the
/// validators to judge unless `skip_missing` is set.
#[derive(Debug, Default)]
pub struct FileCollector;

impl FileCollector {
    fn requested(options: &Map<String, Value>) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = options
            .get("path")
            .and_then(Value::as_str)
            .map(PathBuf::from)
            .into_iter()
            .collect();
        if let Some(list) = options.get("paths").and_then(Value::as_array) {
            paths.extend(list.iter().filter_map(Value::as_str).map(PathBuf::from));
        }
        paths
    }

    fn accepts(path: &Path, options: &Map<String, Value>) -> bool {
        let Some(extensions) = options.get("extensions").and_then(Value::as_array) else {
            return true;
        };
        let Some(extension) = path.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        extensions
            .iter()
            .filter_map(Value::as_str)
            .any(|wanted| wanted.trim_start_matches('.').eq_ignore_ascii_case(extension))
    }
}

impl Plugin for FileCollector {
    fn name(&self) -> &str {
        "file_collector"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Collector
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        let skip_missing = input
            .option("skip_missing")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut collected = Vec::new();
        let mut skipped = 0;
        for path in Self::requested(input.options) {
            if !Self::accepts(&path, input.options) {
                debug!(path = %path.display(), "skipped, extension not accepted");
            } else if skip_missing && !path.is_file() {
                debug!(path = %path.display(), "skipped, not found");
                skipped += 1;
            } else {
                collected.push(Value::String(path.display().to_string()));
            }
        }
        let output = PluginOutput::new(Value::Array(collected));
        if skipped > 0 {
            Ok(output.with_message(format!("{} missing path(s) skipped", skipped)))
        } else {
            Ok(output)
        }
    }

    fn has_ui_hook(&self) -> bool {
        true
    }

    /// Lists the accepted files of `payload.directory`, sorted by name.
    fn ui_hook(&self, payload: &Value, options: &Map<String, Value>) -> Result<Value, Failure> {
        let directory = payload
            .get("directory")
            .and_then(Value::as_str)
            .ok_or_else(|| Failure::ui_hook("payload.directory is required"))?;
        let entries = fs::read_dir(directory)
            .map_err(|e| Failure::ui_hook(format!("cannot list {}: {}", directory, e)))?;
        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && Self::accepts(path, options))
            .map(|path| path.display().to_string())
            .collect();
        files.sort();
        Ok(json!(files))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use framework_core::{Reference, Store};

    fn run(plugin: &dyn Plugin, options: Value) -> Result<PluginOutput, Failure> {
        let mut store = Store::new();
        let reference = Reference::new("components", "collector");
        let options = options.as_object().cloned().unwrap_or_default();
        let mut input = PluginInput {
            store: &mut store,
            options: &options,
            reference: &reference,
        };
        plugin.run(&mut input)
    }

    #[test]
    fn test_passthrough_returns_items() {
        let output = run(&PassthroughCollector, json!({"items": ["a", "b"]})).unwrap();
        assert_eq!(output.value, json!(["a", "b"]));
        assert_eq!(run(&PassthroughCollector, json!({})).unwrap().value, json!([]));
        assert!(run(&PassthroughCollector, json!({"items": "a"})).is_err());
    }

    #[test]
    fn test_passthrough_ui_hook_filters() {
        let options = json!({"items": ["shot_010.mb", "shot_020.mb", "asset.ma"]});
        let found = PassthroughCollector
            .ui_hook(&json!({"filter": "shot"}), options.as_object().unwrap())
            .unwrap();
        assert_eq!(found, json!(["shot_010.mb", "shot_020.mb"]));
    }

    #[test]
    fn test_file_collector_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let scene = dir.path().join("scene.mb");
        let notes = dir.path().join("notes.txt");
        fs::write(&scene, b"maya").unwrap();
        fs::write(&notes, b"todo").unwrap();
        let ghost = dir.path().join("ghost.mb");
        let options = json!({
            "path": scene.display().to_string(),
            "paths": [notes.display().to_string(), ghost.display().to_string()],
            "extensions": [".mb"],
        });

        let output = run(&FileCollector, options.clone()).unwrap();
        assert_eq!(
            output.value,
            json!([scene.display().to_string(), ghost.display().to_string()])
        );

        let mut skipping = options;
        skipping["skip_missing"] = json!(true);
        let output = run(&FileCollector, skipping).unwrap();
        assert_eq!(output.value, json!([scene.display().to_string()]));
        assert_eq!(output.message.as_deref(), Some("1 missing path(s) skipped"));
    }

    #[test]
    fn test_file_collector_ui_hook_lists_directory() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.exr"), b"").unwrap();
        fs::write(dir.path().join("a.exr"), b"").unwrap();
        fs::write(dir.path().join("c.txt"), b"").unwrap();
        let options = json!({"extensions": ["exr"]});
        let listed = FileCollector
            .ui_hook(
                &json!({"directory": dir.path().display().to_string()}),
                options.as_object().unwrap(),
            )
            .unwrap();
        let names: Vec<String> = listed
            .as_array()
            .unwrap()
            .iter()
            .map(|p| Path::new(p.as_str().unwrap()).file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a.exr", "b.exr"]);
        assert!(FileCollector.ui_hook(&json!({}), &Map::new()).is_err());
    }
}

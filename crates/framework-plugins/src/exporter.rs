//! JSON exporter: writes the collected items and the resolved context to a
//! manifest file.
use framework_core::{Failure, Plugin, PluginInput, PluginKind, PluginOutput, CONTEXT_KEYS};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::fs;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Serialize)]
struct Manifest<'a> {
    step: &'a str,
    context: Map<String, Value>,
    items: Vec<Value>,
}

/// Options: `output` (required manifest path), `source_stage` (stage whose
/// results are exported, default `collector`).
#[derive(Debug, Default)]
pub struct JsonExporter;

impl Plugin for JsonExporter {
    fn name(&self) -> &str {
        "json_exporter"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Exporter
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        let output = input
            .option_str("output")
            .map(PathBuf::from)
            .ok_or_else(|| Failure::validation("option 'output' is required"))?;
        let source = input.option_str("source_stage").unwrap_or("collector");

        let mut items = Vec::new();
        for (_, value) in input.store.stage_results(&input.reference.step, source) {
            match value {
                Value::Array(list) => items.extend(list.iter().cloned()),
                other => items.push(other.clone()),
            }
        }
        let context = CONTEXT_KEYS
            .iter()
            .filter_map(|key| input.store.get(key).map(|v| (key.to_string(), v.clone())))
            .collect();
        let manifest = Manifest {
            step: &input.reference.step,
            context,
            items,
        };

        let text = serde_json::to_string_pretty(&manifest)
            .map_err(|e| Failure::execution(format!("cannot serialize manifest: {}", e)))?;
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .map_err(|e| Failure::execution(format!("cannot create {}: {}", parent.display(), e)))?;
        }
        fs::write(&output, text)
            .map_err(|e| Failure::execution(format!("cannot write {}: {}", output.display(), e)))?;
        info!(path = %output.display(), items = manifest.items.len(), "manifest exported");

        Ok(PluginOutput::new(json!([output.display().to_string()]))
            .with_message(format!("{} item(s) exported", manifest.items.len())))
    }
}

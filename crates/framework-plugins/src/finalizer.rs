//! Summary finalizer: records what the run produced.
use framework_core::{Failure, Plugin, PluginInput, PluginKind, PluginOutput};
use serde_json::{json, Value};

/// Store key the summary is written under.
pub const SUMMARY_KEY: &str = "summary";

/// Counts the recorded results per step and stamps the store digest.
#[derive(Debug, Default)]
pub struct SummaryFinalizer;

impl Plugin for SummaryFinalizer {
    fn name(&self) -> &str {
        "summary_finalizer"
    }

    fn kind(&self) -> PluginKind {
        PluginKind::Finalizer
    }

    fn run(&self, input: &mut PluginInput<'_>) -> Result<PluginOutput, Failure> {
        let mut steps = serde_json::Map::new();
        if let Some(components) = input.store.components() {
            for (step, stages) in components {
                let results = stages
                    .as_object()
                    .map(|stages| {
                        stages
                            .values()
                            .filter_map(Value::as_object)
                            .map(|plugins| plugins.len())
                            .sum::<usize>()
                    })
                    .unwrap_or(0);
                steps.insert(step.clone(), json!(results));
            }
        }
        let summary = json!({
            "steps": steps,
            "digest": input.store.digest(),
        });
        input.store.set(SUMMARY_KEY, summary.clone());
        Ok(summary.into())
    }
}

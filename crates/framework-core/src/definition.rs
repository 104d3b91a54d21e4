//! Pipeline definitions: the ordered step → stage → plugin structure.
//!
//! Definitions are loaded once (YAML or JSON) and read-only afterwards.
//! Declaration order is execution order.
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::plugin::OutputContract;
use crate::status::{PipelineType, PluginKind};

/// Where a plugin sits inside a definition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Reference {
    pub step: String,
    pub stage: String,
}

impl Reference {
    pub fn new(step: impl Into<String>, stage: impl Into<String>) -> Self {
        Self {
            step: step.into(),
            stage: stage.into(),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.step, self.stage)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PluginDefinition {
    /// Name used in logs and for run-time option overrides.
    pub name: String,
    /// Registered plugin id; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugin: Option<String>,
    pub kind: PluginKind,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_type: Vec<String>,
    #[serde(default)]
    pub options: Map<String, Value>,
    /// Overrides the plugin's own output contract.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputContract>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl PluginDefinition {
    pub fn new(name: impl Into<String>, kind: PluginKind) -> Self {
        Self {
            name: name.into(),
            plugin: None,
            kind,
            host_type: Vec::new(),
            options: Map::new(),
            output: None,
            enabled: true,
        }
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = Some(plugin.into());
        self
    }

    pub fn with_option(mut self, key: impl Into<String>, value: Value) -> Self {
        self.options.insert(key.into(), value);
        self
    }

    pub fn with_output(mut self, output: OutputContract) -> Self {
        self.output = Some(output);
        self
    }

    pub fn plugin_id(&self) -> &str {
        self.plugin.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageDefinition {
    pub name: String,
    #[serde(default)]
    pub plugins: Vec<PluginDefinition>,
}

impl StageDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plugins: Vec::new(),
        }
    }

    pub fn plugin(mut self, plugin: PluginDefinition) -> Self {
        self.plugins.push(plugin);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,
    #[serde(default)]
    pub stages: Vec<StageDefinition>,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: StageDefinition) -> Self {
        self.stages.push(stage);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub name: String,
    #[serde(rename = "type")]
    pub pipeline_type: PipelineType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub host_type: Vec<String>,
    #[serde(default)]
    pub steps: Vec<StepDefinition>,
}

impl PipelineDefinition {
    pub fn new(name: impl Into<String>, pipeline_type: PipelineType) -> Self {
        Self {
            name: name.into(),
            pipeline_type,
            host_type: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn with_host_type(mut self, host_type: impl Into<String>) -> Self {
        self.host_type.push(host_type.into());
        self
    }

    pub fn step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Every plugin with its reference, in execution order.
    pub fn plugins(&self) -> impl Iterator<Item = (Reference, &PluginDefinition)> + '_ {
        self.steps.iter().flat_map(|step| {
            step.stages.iter().flat_map(move |stage| {
                stage
                    .plugins
                    .iter()
                    .map(move |plugin| (Reference::new(&step.name, &stage.name), plugin))
            })
        })
    }

    pub fn plugin_count(&self) -> usize {
        self.plugins().count()
    }

    pub fn from_yaml_str(text: &str) -> Result<Self> {
        let definition: Self = serde_yaml::from_str(text)
            .map_err(|e| CoreError::definition(format!("invalid YAML: {}", e)))?;
        definition.validate()?;
        Ok(definition)
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(text)
            .map_err(|e| CoreError::definition(format!("invalid JSON: {}", e)))?;
        definition.validate()?;
        Ok(definition)
    }

    /// Loads a definition file, picking the format from the extension.
    pub fn from_path(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| CoreError::DefinitionIo {
            path: path.display().to_string(),
            source,
        })?;
        let parsed = match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::from_json_str(&text),
            _ => Self::from_yaml_str(&text),
        };
        parsed.map_err(|e| CoreError::definition(format!("{}: {}", path.display(), e)))
    }

    /// Structural checks the serde layer cannot express.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(CoreError::definition("pipeline name is empty"));
        }
        if self.steps.is_empty() {
            return Err(CoreError::definition(format!(
                "pipeline '{}' has no steps",
                self.name
            )));
        }
        for step in &self.steps {
            if step.name.trim().is_empty() {
                return Err(CoreError::definition(format!(
                    "pipeline '{}' has a step without a name",
                    self.name
                )));
            }
            for stage in &step.stages {
                if stage.name.trim().is_empty() {
                    return Err(CoreError::definition(format!(
                        "step '{}' has a stage without a name",
                        step.name
                    )));
                }
                let mut seen = std::collections::HashSet::new();
                for plugin in &stage.plugins {
                    if plugin.name.trim().is_empty() {
                        return Err(CoreError::definition(format!(
                            "stage '{}/{}' has a plugin without a name",
                            step.name, stage.name
                        )));
                    }
                    if !seen.insert(plugin.name.as_str()) {
                        return Err(CoreError::definition(format!(
                            "plugin '{}' appears twice in stage '{}/{}'",
                            plugin.name, step.name, stage.name
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Loads every `*.yaml`, `*.yml` and `*.json` definition in the given
/// directories, sorted by file name within each directory. Missing
/// directories are skipped.
pub fn load_definitions(dirs: &[PathBuf]) -> Result<Vec<PipelineDefinition>> {
    let mut definitions = Vec::new();
    for dir in dirs {
        if !dir.is_dir() {
            tracing::debug!(dir = %dir.display(), "definition directory missing, skipping");
            continue;
        }
        let entries = std::fs::read_dir(dir).map_err(|source| CoreError::DefinitionIo {
            path: dir.display().to_string(),
            source,
        })?;
        let mut paths: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some("yaml") | Some("yml") | Some("json")
                )
            })
            .collect();
        paths.sort();
        for path in paths {
            definitions.push(PipelineDefinition::from_path(&path)?);
        }
    }
    tracing::info!(count = definitions.len(), "loaded pipeline definitions");
    Ok(definitions)
}

#[cfg(test)]
mod tests {
    use super::*;

    const PUBLISHER_YAML: &str = r#"
name: file-publisher
type: publisher
host_type: [common]
steps:
  - name: components
    stages:
      - name: collector
        plugins:
          - name: file_collector
            kind: collector
            options:
              folder: /tmp
      - name: validator
        plugins:
          - name: non_empty
            plugin: non_empty_validator
            kind: validator
  - name: finalizers
    stages:
      - name: finalizer
        plugins:
          - name: summary
            kind: finalizer
"#;

    #[test]
    fn test_parse_yaml_preserves_order() {
        let definition = PipelineDefinition::from_yaml_str(PUBLISHER_YAML).unwrap();
        assert_eq!(definition.pipeline_type, PipelineType::Publisher);
        let names: Vec<String> = definition
            .plugins()
            .map(|(reference, p)| format!("{}:{}", reference, p.name))
            .collect();
        assert_eq!(
            names,
            vec![
                "components/collector:file_collector",
                "components/validator:non_empty",
                "finalizers/finalizer:summary",
            ]
        );
        let validator = definition.plugins().nth(1).unwrap().1;
        assert_eq!(validator.plugin_id(), "non_empty_validator");
        assert!(validator.enabled);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let yaml = PUBLISHER_YAML.replace("kind: finalizer", "kind: renderer");
        let err = PipelineDefinition::from_yaml_str(&yaml).unwrap_err();
        assert!(err.to_string().starts_with("DEFINITION/"));
    }

    #[test]
    fn test_duplicate_plugin_in_stage_is_rejected() {
        let definition = PipelineDefinition::new("dup", PipelineType::Loader).step(
            StepDefinition::new("main").stage(
                StageDefinition::new("collector")
                    .plugin(PluginDefinition::new("a", PluginKind::Collector))
                    .plugin(PluginDefinition::new("a", PluginKind::Collector)),
            ),
        );
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_empty_pipeline_is_rejected() {
        let definition = PipelineDefinition::new("empty", PipelineType::Opener);
        assert!(definition.validate().is_err());
    }

    #[test]
    fn test_load_definitions_from_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b_publisher.yaml"), PUBLISHER_YAML).unwrap();
        let json = serde_json::to_string(
            &PipelineDefinition::new("a-loader", PipelineType::Loader)
                .step(StepDefinition::new("main")),
        )
        .unwrap();
        std::fs::write(dir.path().join("a_loader.json"), json).unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let loaded = load_definitions(&[
            dir.path().to_path_buf(),
            dir.path().join("missing"),
        ])
        .unwrap();
        let names: Vec<&str> = loaded.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["a-loader", "file-publisher"]);
    }
}

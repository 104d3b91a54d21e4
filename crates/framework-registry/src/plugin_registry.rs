//! Plugin registry: `(plugin id, host type)` → implementation.
//!
//! Several implementations may share one id (a `maya` and a `common`
//! collector, say). Resolution picks the one whose host type ranks best for
//! the requesting host.
use framework_core::{Plugin, PluginDefinition, PluginKind, PluginResolver};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

use crate::compat::CompatMatrix;
use crate::error::{RegistryError, Result};

/// Serializable description of a registered implementation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub kind: PluginKind,
    pub host_types: Vec<String>,
    pub ui_hook: bool,
    pub main_thread: bool,
}

#[derive(Default)]
pub struct PluginRegistry {
    plugins: BTreeMap<String, Vec<Arc<dyn Plugin>>>,
    compat: CompatMatrix,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            plugins: BTreeMap::new(),
            compat: CompatMatrix::standard(),
        }
    }

    pub fn with_compat(mut self, compat: CompatMatrix) -> Self {
        self.compat = compat;
        self
    }

    pub fn compat(&self) -> &CompatMatrix {
        &self.compat
    }

    /// Registers `plugin` under its own name.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) -> Result<()> {
        let id = plugin.name().to_string();
        self.register_as(id, plugin)
    }

    /// Registers `plugin` under `id`. Two implementations of one id may not
    /// claim the same host type.
    pub fn register_as(&mut self, id: impl Into<String>, plugin: Arc<dyn Plugin>) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(RegistryError::Invalid("plugin id must not be empty".into()));
        }
        let host_types = plugin.host_types();
        let existing = self.plugins.entry(id.clone()).or_default();
        for other in existing.iter() {
            if let Some(clash) = other.host_types().into_iter().find(|h| host_types.contains(h)) {
                return Err(RegistryError::Duplicate {
                    name: id,
                    host_type: clash,
                });
            }
        }
        debug!(plugin = %id, host_types = ?host_types, "plugin registered");
        existing.push(plugin);
        Ok(())
    }

    /// Best implementation of `id` for a host advertising `host_types`.
    pub fn get(&self, id: &str, host_types: &[String]) -> Option<Arc<dyn Plugin>> {
        self.plugins
            .get(id)?
            .iter()
            .filter_map(|p| {
                self.compat
                    .priority(&p.host_types(), host_types)
                    .map(|rank| (rank, p))
            })
            .min_by_key(|(rank, _)| *rank)
            .map(|(_, p)| Arc::clone(p))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.plugins.contains_key(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.plugins.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Every implementation usable on a host, sorted by id.
    pub fn entries_for(&self, host_types: &[String]) -> Vec<RegistryEntry> {
        self.plugins
            .iter()
            .flat_map(|(id, plugins)| plugins.iter().map(move |p| (id, p)))
            .filter(|(_, p)| self.compat.priority(&p.host_types(), host_types).is_some())
            .map(|(id, p)| RegistryEntry {
                id: id.clone(),
                kind: p.kind(),
                host_types: p.host_types(),
                ui_hook: p.has_ui_hook(),
                main_thread: p.requires_main_thread(),
            })
            .collect()
    }
}

impl PluginResolver for PluginRegistry {
    fn resolve(&self, definition: &PluginDefinition, host_types: &[String]) -> Option<Arc<dyn Plugin>> {
        let plugin = self.get(definition.plugin_id(), host_types)?;
        // A definition pinned to host types only accepts matching implementations.
        if !definition.host_type.is_empty()
            && !definition
                .host_type
                .iter()
                .any(|tag| plugin.host_types().contains(tag) || tag == framework_core::COMMON_HOST_TYPE)
        {
            return None;
        }
        Some(plugin)
    }
}

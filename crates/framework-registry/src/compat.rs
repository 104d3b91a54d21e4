//! Host-type compatibility matrix.
//!
//! A host advertises an ordered list of host types, most specific first
//! (`["maya", "qt"]`). Some host types imply others: every DCC with an
//! embedded interpreter also runs `python` plugins. `common` matches every
//! host and always sorts last.
use framework_core::COMMON_HOST_TYPE;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompatMatrix {
    pub implied: HashMap<String, Vec<String>>,
}

impl CompatMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Matrix with the DCC hosts the framework ships definitions for.
    pub fn standard() -> Self {
        ["maya", "nuke", "houdini", "max", "blender", "photoshop", "harmony", "unreal"]
            .into_iter()
            .fold(Self::new(), |matrix, dcc| matrix.with_implied(dcc, ["python"]))
    }

    pub fn with_implied<I, S>(mut self, host_type: impl Into<String>, implies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.implied
            .entry(host_type.into())
            .or_default()
            .extend(implies.into_iter().map(Into::into));
        self
    }

    /// Advertised host types followed by everything they imply, deduplicated,
    /// with `common` last.
    pub fn expand(&self, host_types: &[String]) -> Vec<String> {
        let mut expanded: Vec<String> = Vec::new();
        let push = |tag: &String, expanded: &mut Vec<String>| {
            if tag != COMMON_HOST_TYPE && !expanded.contains(tag) {
                expanded.push(tag.clone());
            }
        };
        for tag in host_types {
            push(tag, &mut expanded);
        }
        for tag in host_types {
            if let Some(implied) = self.implied.get(tag) {
                for extra in implied {
                    push(extra, &mut expanded);
                }
            }
        }
        expanded.push(COMMON_HOST_TYPE.to_string());
        expanded
    }

    /// True when a definition tagged with `tags` may run on a host
    /// advertising `host_types`. Untagged definitions run anywhere.
    pub fn is_compatible(&self, tags: &[String], host_types: &[String]) -> bool {
        if tags.is_empty() {
            return true;
        }
        let expanded = self.expand(host_types);
        tags.iter().any(|tag| expanded.contains(tag))
    }

    /// Rank of `tags` for a host: index of the best matching host type,
    /// lower is more specific. `None` when incompatible.
    pub fn priority(&self, tags: &[String], host_types: &[String]) -> Option<usize> {
        let expanded = self.expand(host_types);
        if tags.is_empty() {
            return Some(expanded.len() - 1);
        }
        tags.iter()
            .filter_map(|tag| expanded.iter().position(|h| h == tag))
            .min()
    }
}

//! Standard plugins shipped with the framework.
//!
//! They are DCC-agnostic (`common` host type) and cover a plain file
//! publish:
//!
//! ```text
//! context ─► file_collector ─► file_exists_validator ─► json_exporter ─► summary_finalizer
//! ```
//!
//! DCC integrations register their own plugins next to these; a DCC-specific
//! plugin registered under the same id wins over the common one for that
//! host.

mod collectors;
mod context;
mod exporter;
mod finalizer;
mod validators;

pub use collectors::{FileCollector, PassthroughCollector};
pub use context::ContextPlugin;
pub use framework_core::CONTEXT_KEYS;
pub use exporter::JsonExporter;
pub use finalizer::{SummaryFinalizer, SUMMARY_KEY};
pub use validators::{FileExistsValidator, NonEmptyValidator};

use framework_core::Plugin;
use framework_registry::{PluginRegistry, RegistryError};
use std::sync::Arc;

/// Every standard plugin, in pipeline order.
pub fn standard_plugins() -> Vec<Arc<dyn Plugin>> {
    vec![
        Arc::new(ContextPlugin),
        Arc::new(PassthroughCollector),
        Arc::new(FileCollector),
        Arc::new(NonEmptyValidator),
        Arc::new(FileExistsValidator),
        Arc::new(JsonExporter),
        Arc::new(SummaryFinalizer),
    ]
}

pub fn register_standard_plugins(registry: &mut PluginRegistry) -> Result<(), RegistryError> {
    for plugin in standard_plugins() {
        registry.register(plugin)?;
    }
    Ok(())
}

/// A registry holding only the standard plugins.
pub fn standard_registry() -> Result<PluginRegistry, RegistryError> {
    let mut registry = PluginRegistry::new();
    register_standard_plugins(&mut registry)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry_ids() {
        let registry = standard_registry().unwrap();
        let ids: Vec<&str> = registry.ids().collect();
        assert_eq!(
            ids,
            vec![
                "context",
                "file_collector",
                "file_exists_validator",
                "json_exporter",
                "non_empty_validator",
                "passthrough_collector",
                "summary_finalizer",
            ]
        );
    }

    #[test]
    fn test_registering_twice_is_rejected() {
        let mut registry = standard_registry().unwrap();
        assert!(register_standard_plugins(&mut registry).is_err());
    }
}

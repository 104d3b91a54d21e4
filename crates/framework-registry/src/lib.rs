//! Framework registry: which plugin implementation answers a definition on a
//! given host, and which host types are compatible with each other.
pub mod compat;
pub mod error;
pub mod plugin_registry;

pub use compat::CompatMatrix;
pub use error::RegistryError;
pub use plugin_registry::{PluginRegistry, RegistryEntry};

//! Unified error model for the engine plumbing.
//!
//! Plugin failures are not errors at this level: they are recorded as
//! [`crate::LogItem`]s. Everything here is a hard failure of the run itself.
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("DEFINITION/{0}")]
    Definition(String),

    #[error("DEFINITION/IO: {path}: {source}")]
    DefinitionIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("PLUGIN/NOT_FOUND: {name} (host types: {host_types})")]
    PluginNotFound { name: String, host_types: String },

    #[error("THREAD/{0}")]
    MainThread(String),

    #[error("SERIALIZE/{0}")]
    Serialize(String),
}

impl CoreError {
    pub fn definition(msg: impl Into<String>) -> Self {
        Self::Definition(msg.into())
    }

    pub fn main_thread(msg: impl Into<String>) -> Self {
        Self::MainThread(msg.into())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialize(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

use framework_core::CoreError;
use framework_event::EventError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("CONFIG/IO: {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("CONFIG/PARSE: {0}")]
    Parse(String),
}

#[derive(Error, Debug)]
pub enum HostError {
    #[error("HOST/EVENT: {0}")]
    Event(#[from] EventError),

    #[error("HOST/CORE: {0}")]
    Core(#[from] CoreError),

    #[error("HOST/{0}")]
    Setup(String),
}

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("CLIENT/EVENT: {0}")]
    Event(#[from] EventError),

    #[error("CLIENT/TIMEOUT: no {what} within {after:?}")]
    Timeout { what: String, after: Duration },

    /// The host could not run the request at all (unknown definition,
    /// unresolvable plugin). Distinct from plugin failures inside a run.
    #[error("CLIENT/RUN_FAILED: host {host_id}: {message}")]
    RunFailed { host_id: String, message: String },

    #[error("CLIENT/UI_HOOK: {0}")]
    UiHook(String),

    #[error("CLIENT/PROTOCOL: {0}")]
    Protocol(String),

    #[error("CLIENT/IO: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Protocol(err.to_string())
    }
}

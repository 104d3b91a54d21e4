use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EventError {
    #[error("EVENT/NOT_CONNECTED: hub is {0}")]
    NotConnected(String),

    #[error("EVENT/CONNECT_TIMEOUT: not connected after {0:?}")]
    ConnectTimeout(Duration),

    #[error("EVENT/FILTER: {0}")]
    Filter(String),

    #[error("EVENT/TRANSPORT: {0}")]
    Transport(String),

    #[error("EVENT/IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("EVENT/SERIALIZE: {0}")]
    Serialize(#[from] serde_json::Error),
}

impl EventError {
    pub fn filter(msg: impl Into<String>) -> Self {
        EventError::Filter(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        EventError::Transport(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, EventError>;

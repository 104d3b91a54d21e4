//! Framework host: the discovery and run-request protocol between DCC
//! hosts and UI clients.
//!
//! ```text
//! Client ── discover ──► Host(s)      replies within the timeout
//! Client ── run ───────► Host         EngineRunner on a worker thread
//! Client ◄── run.result ─ Host        correlated by request_id
//! ```
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod history;
pub mod host;
pub mod protocol;

pub use client::{Client, RunReport, RunTicket};
pub use config::FrameworkConfig;
pub use connection::HostConnection;
pub use error::{ClientError, ConfigError, HostError};
pub use history::{RunHistory, RunRecord};
pub use host::{Host, HostBuilder, UI_HOST_TYPE};
pub use protocol::{
    topics, DefinitionSummary, HostInfo, LogItemEvent, RunRequest, RunResultPayload, UiHookReply,
    UiHookRequest,
};

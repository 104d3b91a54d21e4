//! Transports move serialized events between hubs.
//!
//! A transport only sends and receives; subscriber matching and reply
//! bookkeeping live in [`crate::EventHub`].
use std::time::Duration;

use crate::error::Result;
use crate::event::Event;

pub mod local;
pub mod remote;

pub use local::{LocalBus, LocalTransport};
pub use remote::RemoteTransport;

pub trait Transport: Send + Sync {
    fn connect(&self) -> Result<()>;

    fn send(&self, event: &Event) -> Result<()>;

    /// Next inbound event, or `None` once `timeout` elapses. A zero timeout
    /// polls.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>>;

    fn disconnect(&self);

    /// Human readable endpoint for logs.
    fn describe(&self) -> String;
}

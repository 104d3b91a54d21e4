//! Framework events: the envelope, subscription filters, the hub, its
//! transports and the broker that links hubs across processes.
//!
//! ```text
//! Host ──┐                       ┌── Client
//!        ├─ EventHub ─ Transport ┤
//!        │   (LocalBus | RemoteTransport ─ tcp ─ Broker)
//! ```
pub mod broker;
pub mod error;
pub mod event;
pub mod filter;
pub mod hub;
pub mod session;
pub mod thread;
pub mod transport;

pub use broker::{Broker, BrokerHandle};
pub use error::EventError;
pub use event::{Event, EventSource, REPLY_TOPIC};
pub use filter::Filter;
pub use hub::{Callback, ConnectionState, EventHub, ReplyHandler, SubscriptionId};
pub use session::Session;
pub use thread::EventHubThread;
pub use transport::{LocalBus, LocalTransport, RemoteTransport, Transport};

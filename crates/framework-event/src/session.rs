//! A connected hub plus the thread draining it.
//!
//! Sessions are created explicitly and handed to hosts and clients; there is
//! no process-wide hub.
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::info;

use crate::error::Result;
use crate::hub::EventHub;
use crate::thread::EventHubThread;
use crate::transport::{LocalBus, RemoteTransport, Transport};

pub struct Session {
    hub: Arc<EventHub>,
    thread: Mutex<Option<EventHubThread>>,
}

impl Session {
    /// Session on an in-process bus.
    pub fn local(bus: &LocalBus) -> Result<Self> {
        Self::with_transport(bus.attach(), Duration::from_secs(1))
    }

    /// Session connected to a broker at `address` (`host:port`).
    pub fn remote(address: &str, connect_timeout: Duration) -> Result<Self> {
        Self::with_transport(RemoteTransport::new(address, connect_timeout), connect_timeout)
    }

    pub fn with_transport(transport: impl Transport + 'static, connect_timeout: Duration) -> Result<Self> {
        let hub = Arc::new(EventHub::new(transport));
        hub.connect()?;
        hub.wait_until_connected(connect_timeout)?;
        let thread = EventHubThread::start(Arc::clone(&hub))?;
        info!(hub = %hub.id(), "session opened");
        Ok(Self {
            hub,
            thread: Mutex::new(Some(thread)),
        })
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    pub fn is_open(&self) -> bool {
        self.hub.is_connected()
    }

    /// Stops the event thread and disconnects. Idempotent.
    pub fn close(&self) {
        let thread = self.thread.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(mut thread) = thread {
            thread.stop();
            self.hub.disconnect();
            info!(hub = %self.hub.id(), "session closed");
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}

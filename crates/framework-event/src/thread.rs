//! Dedicated OS thread that keeps a hub's event loop running.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{EventError, Result};
use crate::hub::EventHub;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub struct EventHubThread {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EventHubThread {
    pub fn start(hub: Arc<EventHub>) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name(format!("event-hub-{}", &hub.id()[..8.min(hub.id().len())]))
            .spawn(move || {
                debug!(hub = %hub.id(), "event hub thread started");
                while !stop_flag.load(Ordering::SeqCst) {
                    match hub.wait(POLL_INTERVAL) {
                        Ok(_) => {}
                        Err(EventError::NotConnected(_)) => thread::sleep(POLL_INTERVAL),
                        Err(e) => {
                            warn!(error = %e, "event loop error");
                            thread::sleep(POLL_INTERVAL);
                        }
                    }
                }
                debug!(hub = %hub.id(), "event hub thread stopped");
            })?;
        Ok(Self {
            stop,
            handle: Some(handle),
        })
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the loop and joins it; returns within one poll interval.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!("event hub thread panicked");
            }
        }
    }
}

impl Drop for EventHubThread {
    fn drop(&mut self) {
        self.stop();
    }
}

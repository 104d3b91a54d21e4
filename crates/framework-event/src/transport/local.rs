//! In-process bus: every event sent by one attached transport is delivered
//! to every attached transport, the sender included.
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use super::Transport;
use crate::error::{EventError, Result};
use crate::event::Event;

#[derive(Clone, Default)]
pub struct LocalBus {
    members: Arc<Mutex<HashMap<u64, Sender<Event>>>>,
    next_member: Arc<AtomicU64>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport on this bus. It receives nothing until connected.
    pub fn attach(&self) -> LocalTransport {
        let (sender, receiver) = unbounded();
        LocalTransport {
            bus: self.clone(),
            member: self.next_member.fetch_add(1, Ordering::Relaxed),
            sender,
            receiver,
            connected: AtomicBool::new(false),
        }
    }

    pub fn member_count(&self) -> usize {
        self.members.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn broadcast(&self, event: &Event) {
        let members: Vec<Sender<Event>> = self
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for member in members {
            // receivers of detached members are gone; nothing to deliver
            let _ = member.send(event.clone());
        }
    }
}

pub struct LocalTransport {
    bus: LocalBus,
    member: u64,
    sender: Sender<Event>,
    receiver: Receiver<Event>,
    connected: AtomicBool,
}

impl Transport for LocalTransport {
    fn connect(&self) -> Result<()> {
        self.bus
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(self.member, self.sender.clone());
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn send(&self, event: &Event) -> Result<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(EventError::transport("local transport is detached"));
        }
        self.bus.broadcast(event);
        Ok(())
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>> {
        if timeout.is_zero() {
            return Ok(self.receiver.try_recv().ok());
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        self.bus
            .members
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.member);
    }

    fn describe(&self) -> String {
        format!("local bus member {}", self.member)
    }
}

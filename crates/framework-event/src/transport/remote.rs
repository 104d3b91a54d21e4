//! Newline-delimited JSON over TCP to a [`crate::Broker`].
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::io::{BufRead, BufReader, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

use super::Transport;
use crate::error::{EventError, Result};
use crate::event::Event;

pub struct RemoteTransport {
    address: String,
    connect_timeout: Duration,
    writer: Mutex<Option<TcpStream>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    alive: Arc<AtomicBool>,
    inbox_tx: Sender<Event>,
    inbox_rx: Receiver<Event>,
}

impl RemoteTransport {
    pub fn new(address: impl Into<String>, connect_timeout: Duration) -> Self {
        let (inbox_tx, inbox_rx) = unbounded();
        Self {
            address: address.into(),
            connect_timeout,
            writer: Mutex::new(None),
            reader: Mutex::new(None),
            alive: Arc::new(AtomicBool::new(false)),
            inbox_tx,
            inbox_rx,
        }
    }

    fn open_stream(&self) -> Result<TcpStream> {
        let mut last_error = None;
        for addr in self.address.to_socket_addrs()? {
            match TcpStream::connect_timeout(&addr, self.connect_timeout) {
                Ok(stream) => return Ok(stream),
                Err(e) => last_error = Some(e),
            }
        }
        Err(match last_error {
            Some(e) => EventError::Io(e),
            None => EventError::transport(format!("{} resolves to no address", self.address)),
        })
    }
}

impl Transport for RemoteTransport {
    fn connect(&self) -> Result<()> {
        // a reconnect must not leave the previous reader feeding the inbox
        self.disconnect();
        let stream = self.open_stream()?;
        stream.set_nodelay(true)?;
        let reader_stream = stream.try_clone()?;

        let inbox = self.inbox_tx.clone();
        let alive = Arc::clone(&self.alive);
        alive.store(true, Ordering::SeqCst);
        let reader = thread::Builder::new()
            .name("event-reader".into())
            .spawn(move || {
                for line in BufReader::new(reader_stream).lines() {
                    let Ok(line) = line else { break };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match Event::from_frame(&line) {
                        Ok(event) => {
                            if inbox.send(event).is_err() {
                                break;
                            }
                        }
                        Err(e) => warn!(error = %e, "dropping malformed frame"),
                    }
                }
                alive.store(false, Ordering::SeqCst);
                debug!("broker connection closed");
            })?;

        *self.writer.lock().unwrap_or_else(PoisonError::into_inner) = Some(stream);
        *self.reader.lock().unwrap_or_else(PoisonError::into_inner) = Some(reader);
        Ok(())
    }

    fn send(&self, event: &Event) -> Result<()> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(EventError::transport(format!("connection to {} is closed", self.address)));
        }
        let frame = event.to_frame()?;
        let mut guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let stream = guard
            .as_mut()
            .ok_or_else(|| EventError::transport("remote transport is not connected"))?;
        stream.write_all(frame.as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    /// Once the reader has ended, events it queued are still handed out;
    /// after that the lost connection is reported as a transport error.
    fn recv_timeout(&self, timeout: Duration) -> Result<Option<Event>> {
        if !self.alive.load(Ordering::SeqCst) {
            return match self.inbox_rx.try_recv() {
                Ok(event) => Ok(Some(event)),
                Err(_) => Err(EventError::transport(format!("connection to {} was lost", self.address))),
            };
        }
        if timeout.is_zero() {
            return Ok(self.inbox_rx.try_recv().ok());
        }
        match self.inbox_rx.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => Ok(None),
        }
    }

    fn disconnect(&self) {
        if let Some(stream) = self.writer.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
        if let Some(reader) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = reader.join();
        }
        self.alive.store(false, Ordering::SeqCst);
    }

    fn describe(&self) -> String {
        format!("broker at {}", self.address)
    }
}

//! Event broker: a tokio TCP server relaying every frame it receives to
//! every connected hub, the sender included.
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, error, info, warn};

use crate::error::{EventError, Result};
use crate::event::Event;

/// Frames buffered per connection before a slow reader starts losing them.
const RELAY_CAPACITY: usize = 1024;

pub struct Broker {
    listener: TcpListener,
    frames: broadcast::Sender<Arc<str>>,
}

impl Broker {
    pub async fn bind(address: &str) -> Result<Self> {
        let listener = TcpListener::bind(address).await?;
        let (frames, _) = broadcast::channel(RELAY_CAPACITY);
        info!(address = %listener.local_addr()?, "broker listening");
        Ok(Self { listener, frames })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serves until the process ends.
    pub async fn run(self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Serves until `shutdown` completes.
    pub async fn run_until<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("broker shutting down");
                    return Ok(());
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        let frames = self.frames.clone();
                        tokio::spawn(async move {
                            if let Err(e) = relay(stream, peer, frames).await {
                                warn!(%peer, error = %e, "connection error");
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "accept error"),
                }
            }
        }
    }

    /// Runs a broker on its own thread and runtime. Dropping the handle stops it.
    pub fn spawn(address: &str) -> Result<BrokerHandle> {
        let address = address.to_string();
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let thread = thread::Builder::new()
            .name("event-broker".into())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(EventError::Io(e)));
                        return;
                    }
                };
                runtime.block_on(async move {
                    let broker = match Broker::bind(&address).await {
                        Ok(broker) => broker,
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                            return;
                        }
                    };
                    let _ = ready_tx.send(broker.local_addr());
                    let _ = broker
                        .run_until(async {
                            let _ = shutdown_rx.await;
                        })
                        .await;
                });
            })?;

        let address = ready_rx
            .recv()
            .map_err(|_| EventError::transport("broker thread exited before binding"))??;
        Ok(BrokerHandle {
            address,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }
}

async fn relay(stream: TcpStream, peer: SocketAddr, frames: broadcast::Sender<Arc<str>>) -> Result<()> {
    debug!(%peer, "hub connected");
    let (reader, mut writer) = stream.into_split();
    let mut outbound = frames.subscribe();

    let writer_task = tokio::spawn(async move {
        loop {
            match outbound.recv().await {
                Ok(frame) => {
                    if writer.write_all(frame.as_bytes()).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(%peer, skipped, "slow hub dropped frames");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        if let Err(e) = Event::from_frame(&line) {
            warn!(%peer, error = %e, "dropping malformed frame");
            continue;
        }
        let frame: Arc<str> = format!("{}\n", line).into();
        // no receivers only means no hub is connected
        let _ = frames.send(frame);
    }

    writer_task.abort();
    debug!(%peer, "hub disconnected");
    Ok(())
}

pub struct BrokerHandle {
    address: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl BrokerHandle {
    pub fn address(&self) -> SocketAddr {
        self.address
    }

    pub fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for BrokerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

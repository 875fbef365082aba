//! Console listener.
//!
//! Accepts consumer connections and streams every pump write to them until
//! the peer leaves or shutdown is requested.

use crate::pump::{ChannelEndpoint, ConsolePump, PreparedMessage};
use crate::shutdown::{DeadChannel, DeadSignal};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, instrument, warn};

/// Why a consumer connection ended.
#[derive(Debug, Error)]
pub enum Disconnect {
    #[error("peer closed the connection")]
    PeerClosed,

    #[error("shutdown requested")]
    Shutdown,

    #[error("endpoint detached from the pump")]
    Detached,

    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Listener that registers each accepted connection with the pump.
pub struct ConsoleListener {
    /// TCP listener.
    listener: TcpListener,
    /// Pump that consumers are fed from.
    pump: ConsolePump,
}

impl ConsoleListener {
    /// Bind a console listener.
    pub async fn bind(address: SocketAddr, pump: ConsolePump) -> std::io::Result<Self> {
        let listener = TcpListener::bind(address).await?;
        Ok(Self { listener, pump })
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept consumers until the signal's current generation closes.
    ///
    /// The listener and every consumer task are in-flight workers, so
    /// `close` on the signal returns only after all of them deregistered.
    #[instrument(skip_all, name = "console")]
    pub async fn run(self, signal: Arc<DeadSignal>) {
        let _in_flight = signal.enter();
        let dead = signal.dead_channel();

        info!(
            listen = %self.local_addr().map(|a| a.to_string()).unwrap_or_default(),
            kind = ?self.pump.kind(),
            "console listener starting"
        );

        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, addr)) => {
                            self.handle_connection(stream, addr, &signal);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept console connection");
                        }
                    }
                }

                _ = dead.closed() => {
                    info!("console listener shutting down");
                    break;
                }
            }
        }
    }

    /// Spawn the task serving one consumer.
    fn handle_connection(&self, stream: TcpStream, peer: SocketAddr, signal: &Arc<DeadSignal>) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on console connection");
        }

        // Registered before spawning so a concurrent close() waits for it.
        let in_flight = signal.enter();
        let dead = signal.dead_channel();
        let pump = self.pump.clone();

        tokio::spawn(async move {
            let (endpoint, messages) = ChannelEndpoint::channel();
            let id = pump.register(Arc::new(endpoint));
            info!(peer = %peer, endpoint = %id, consumers = pump.len(), "console consumer connected");

            let reason = serve_consumer(stream, messages, dead).await;

            // A detached endpoint may already have been removed by its owner.
            if !pump.deregister(id) && !matches!(reason, Disconnect::Detached) {
                warn!(endpoint = %id, "console consumer was already deregistered");
            }
            match reason {
                Disconnect::Io(ref e) => {
                    warn!(peer = %peer, endpoint = %id, error = %e, "console consumer dropped");
                }
                _ => {
                    info!(peer = %peer, endpoint = %id, reason = %reason, "console consumer disconnected");
                }
            }

            drop(in_flight);
        });
    }
}

/// Forward queued messages to the socket until the consumer goes away.
async fn serve_consumer(
    stream: TcpStream,
    mut messages: mpsc::Receiver<PreparedMessage>,
    dead: DeadChannel,
) -> Disconnect {
    let (mut reader, mut writer) = stream.into_split();
    let mut scratch = [0u8; 512];

    let reason = loop {
        tokio::select! {
            message = messages.recv() => {
                // Deregistered elsewhere, or the consumer fell too far behind.
                let Some(message) = message else {
                    break Disconnect::Detached;
                };
                if let Err(e) = writer.write_all(message.payload()).await {
                    break Disconnect::Io(e);
                }
            }

            read = reader.read(&mut scratch) => {
                match read {
                    Ok(0) => break Disconnect::PeerClosed,
                    // Consumers are read-only; anything they send is discarded.
                    Ok(n) => debug!(bytes = n, "ignoring console input"),
                    Err(e) => break Disconnect::Io(e),
                }
            }

            _ = dead.closed() => {
                flush_pending(&mut writer, &mut messages).await;
                break Disconnect::Shutdown;
            }
        }
    };

    let _ = writer.shutdown().await;
    reason
}

/// Best-effort delivery of lines queued before shutdown.
async fn flush_pending(
    writer: &mut OwnedWriteHalf,
    messages: &mut mpsc::Receiver<PreparedMessage>,
) {
    while let Ok(message) = messages.try_recv() {
        if writer.write_all(message.payload()).await.is_err() {
            return;
        }
    }
}

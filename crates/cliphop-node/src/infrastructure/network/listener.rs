//! Inbound message listener.
//!
//! Each peer opens a fresh TCP connection per clipboard message, writes one
//! JSON document, and closes its write half.  The listener reads until EOF
//! (bounded by the payload limit and a read deadline), decodes the message,
//! and forwards it on an async channel to whoever drives the sync controller.
//!
//! ```text
//! peer ──TCP──► accept loop ──spawn──► read_to_end ─► decode ─► mpsc ─► controller
//! ```
//!
//! # Port probing
//!
//! Several nodes may share one machine (or a previous instance may still hold
//! the port), so [`bind_with_probe`] walks upward from the configured port
//! until a bind succeeds.  The port actually bound is what discovery
//! advertises.
//!
//! # Memory bound
//!
//! At most [`DEFAULT_MAX_CONNECTIONS`] connections are read at once.  A slot
//! is taken before `accept`, so further peers wait in the kernel backlog
//! rather than in memory, and the worst case is
//! `max_connections × (max_payload_bytes + 1)` bytes of read buffers.
//!
//! # Shutdown
//!
//! `accept` is polled with a short timeout.  After each timeout the loop
//! checks the shared `running` flag, so [`MessageListener::stop`] takes effect
//! within one poll interval without needing to close the socket from another
//! task.

use std::net::{IpAddr, SocketAddr};
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use cliphop_core::{decode_message_with_limit, Message, MAX_PAYLOAD_BYTES};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// How often the accept loop checks the running flag.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for a peer to finish writing its message.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Connections read concurrently.
pub const DEFAULT_MAX_CONNECTIONS: usize = 4;

/// Error type for listener start-up.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("no free port on {ip} in {start_port}..{start_port}+{attempts}")]
    NoAvailablePort {
        ip: IpAddr,
        start_port: u16,
        attempts: u16,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

/// A decoded message together with the address it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message: Message,
    pub peer_addr: SocketAddr,
}

/// Listener settings.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub bind_ip: IpAddr,
    /// First port tried.  `0` lets the OS choose and disables probing.
    pub start_port: u16,
    pub probe_attempts: u16,
    pub max_payload_bytes: usize,
    pub accept_poll: Duration,
    pub read_timeout: Duration,
    /// Connections read concurrently; `0` is treated as `1`.
    pub max_connections: usize,
}

impl ListenerConfig {
    pub fn new(bind_ip: IpAddr, start_port: u16) -> Self {
        Self {
            bind_ip,
            start_port,
            probe_attempts: 100,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
            accept_poll: ACCEPT_POLL_INTERVAL,
            read_timeout: DEFAULT_READ_TIMEOUT,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Binds the first free port in `start_port..start_port + attempts`.
///
/// # Errors
///
/// Returns [`ListenerError::NoAvailablePort`] when every candidate is taken,
/// or [`ListenerError::Bind`] when an OS-chosen port (`start_port == 0`)
/// cannot be bound.
pub fn bind_with_probe(
    ip: IpAddr,
    start_port: u16,
    attempts: u16,
) -> Result<TcpListener, ListenerError> {
    if start_port == 0 {
        let addr = SocketAddr::new(ip, 0);
        return try_bind(addr).map_err(|source| ListenerError::Bind { addr, source });
    }

    for offset in 0..attempts.max(1) {
        let Some(port) = start_port.checked_add(offset) else {
            break;
        };
        let addr = SocketAddr::new(ip, port);
        match try_bind(addr) {
            Ok(listener) => return Ok(listener),
            Err(e) => debug!("port {port} unavailable: {e}"),
        }
    }

    Err(ListenerError::NoAvailablePort {
        ip,
        start_port,
        attempts,
    })
}

fn try_bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = match addr {
        SocketAddr::V4(_) => TcpSocket::new_v4()?,
        SocketAddr::V6(_) => TcpSocket::new_v6()?,
    };
    // Lets a restarted node reclaim its port while old connections sit in
    // TIME_WAIT.  Linux only: on the BSDs it also lets a specific address
    // bind over a wildcard listener, and on Windows it allows port stealing,
    // either of which would hide an occupied port from the probe.
    #[cfg(target_os = "linux")]
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(128)
}

/// A running accept loop.
pub struct MessageListener {
    local_addr: SocketAddr,
    running: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl MessageListener {
    /// Binds a port and spawns the accept loop.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`bind_with_probe`].
    pub fn start(
        config: ListenerConfig,
        tx: mpsc::Sender<InboundMessage>,
    ) -> Result<Self, ListenerError> {
        let listener = bind_with_probe(config.bind_ip, config.start_port, config.probe_attempts)?;
        let local_addr = listener.local_addr().map_err(|source| ListenerError::Bind {
            addr: SocketAddr::new(config.bind_ip, config.start_port),
            source,
        })?;

        if config.start_port != 0 && local_addr.port() != config.start_port {
            info!(
                "port {} busy; listener moved to {}",
                config.start_port,
                local_addr.port()
            );
        }
        info!("message listener bound on {local_addr}");

        let running = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(accept_loop(listener, config, tx, Arc::clone(&running)));

        Ok(Self {
            local_addr,
            running,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Asks the accept loop to exit.  Safe to call more than once.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::Relaxed) {
            debug!("message listener on {} stopping", self.local_addr);
        }
    }

    /// Stops the loop and waits for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        if let Err(e) = self.task.await {
            warn!("listener task ended abnormally: {e}");
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ListenerConfig,
    tx: mpsc::Sender<InboundMessage>,
    running: Arc<AtomicBool>,
) {
    let slots = Arc::new(Semaphore::new(config.max_connections.max(1)));

    while running.load(Ordering::Relaxed) {
        if tx.is_closed() {
            debug!("inbound channel closed; listener exiting");
            break;
        }

        // Wait for a free slot without losing sight of the running flag.
        let permit =
            match tokio::time::timeout(config.accept_poll, Arc::clone(&slots).acquire_owned()).await {
                Err(_) => continue,
                Ok(Ok(permit)) => permit,
                Ok(Err(_)) => break,
            };

        let (stream, peer_addr) =
            match tokio::time::timeout(config.accept_poll, listener.accept()).await {
                Err(_) => continue,
                Ok(Ok(pair)) => pair,
                Ok(Err(e)) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            };

        debug!("connection from {peer_addr}");
        let (max_payload_bytes, read_timeout, tx) =
            (config.max_payload_bytes, config.read_timeout, tx.clone());
        tokio::spawn(async move {
            handle_connection(stream, peer_addr, max_payload_bytes, read_timeout, tx).await;
            drop(permit);
        });
    }
    running.store(false, Ordering::Relaxed);
    info!("message listener stopped");
}

async fn handle_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    max_payload_bytes: usize,
    read_timeout: Duration,
    tx: mpsc::Sender<InboundMessage>,
) {
    // One byte past the limit is enough to tell "too large" from "exactly max".
    let limit = max_payload_bytes.saturating_add(1) as u64;
    let mut buf = Vec::new();

    match tokio::time::timeout(read_timeout, stream.take(limit).read_to_end(&mut buf)).await {
        Err(_) => {
            warn!("read from {peer_addr} timed out after {read_timeout:?}");
            return;
        }
        Ok(Err(e)) => {
            warn!("read from {peer_addr} failed: {e}");
            return;
        }
        Ok(Ok(_)) => {}
    }

    let message = match decode_message_with_limit(&buf, max_payload_bytes) {
        Ok(message) => message,
        Err(e) => {
            warn!("dropping message from {peer_addr}: {e}");
            return;
        }
    };

    debug!(sender_id = %message.sender_id, "message received from {peer_addr}");
    if tx.send(InboundMessage { message, peer_addr }).await.is_err() {
        debug!("inbound channel closed; message from {peer_addr} discarded");
    }
}

//! Outbound message delivery over short-lived TCP connections.
//!
//! One message, one connection: bind the local interface address, connect,
//! write the encoded JSON, half-close, drop.  Binding the source address
//! makes the connection leave through the mesh interface so the receiving
//! side sees a trusted source address.
//!
//! The whole exchange runs under one deadline.  Failures are reported to the
//! caller and never retried.

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use cliphop_core::{encode_message_with_limit, Message, MAX_PAYLOAD_BYTES};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpSocket;
use tracing::debug;

use crate::application::sync_controller::{MessageSender, SendError};

/// Default connect-and-write deadline.
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(5);

/// [`MessageSender`] backed by Tokio TCP sockets.
#[derive(Debug, Clone)]
pub struct TcpMessageSender {
    local_ip: IpAddr,
    timeout: Duration,
    max_payload_bytes: usize,
}

impl TcpMessageSender {
    pub fn new(local_ip: IpAddr) -> Self {
        Self {
            local_ip,
            timeout: DEFAULT_SEND_TIMEOUT,
            max_payload_bytes: MAX_PAYLOAD_BYTES,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_payload_bytes(mut self, max: usize) -> Self {
        self.max_payload_bytes = max;
        self
    }

    async fn deliver(&self, target: SocketAddr, payload: &[u8]) -> Result<(), SendError> {
        let io_err = |source: std::io::Error| SendError::Io {
            addr: target,
            source,
        };

        let socket = match target {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(io_err)?;

        // Only bind when the families match; an unspecified address means
        // "let the OS route it".
        if !self.local_ip.is_unspecified() && self.local_ip.is_ipv4() == target.is_ipv4() {
            let local = SocketAddr::new(self.local_ip, 0);
            socket
                .bind(local)
                .map_err(|source| SendError::Bind { local, source })?;
        }

        let mut stream = socket.connect(target).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionRefused {
                SendError::Refused { addr: target }
            } else {
                io_err(e)
            }
        })?;

        stream.write_all(payload).await.map_err(io_err)?;
        stream.shutdown().await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl MessageSender for TcpMessageSender {
    async fn send(&self, target: SocketAddr, message: &Message) -> Result<usize, SendError> {
        let payload = encode_message_with_limit(message, self.max_payload_bytes)?;
        debug!(bytes = payload.len(), "sending message to {target}");

        match tokio::time::timeout(self.timeout, self.deliver(target, &payload)).await {
            Ok(result) => result.map(|()| payload.len()),
            Err(_) => Err(SendError::Timeout {
                addr: target,
                timeout: self.timeout,
            }),
        }
    }
}

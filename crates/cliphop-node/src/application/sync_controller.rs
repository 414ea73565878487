//! SyncController: moves clipboard text between this node and its peers.
//!
//! This use case is the heart of the node.  It receives local clipboard
//! changes, decides whether they should be sent, fans them out to every
//! trusted peer, and handles messages that arrive from peers.
//!
//! # Architecture
//!
//! The controller depends only on traits ([`MessageSender`], [`Clipboard`],
//! [`Notifier`]) and on the [`PeerRegistry`].  Infrastructure implementations
//! are injected at construction time, so every rule below is unit-testable
//! without sockets or a desktop session.
//!
//! # Echo suppression (for beginners)
//!
//! Without care, two nodes with auto-receive enabled ping-pong forever:
//!
//! ```text
//! A: user copies "x"  ──send──►  B: writes "x" to clipboard
//!                                 B: clipboard watcher sees "x" ──send──► A ...
//! ```
//!
//! The controller breaks the cycle with two remembered values:
//!
//! - `last_observed` – the last local clipboard text it looked at.  A change
//!   notification carrying the same text is a duplicate, not a change.
//! - `last_received` – the last text written to the clipboard on behalf of a
//!   peer.  The first local change that equals it is our own write coming
//!   back, so it is recorded as observed and not sent.
//!
//! `last_received` is cleared only by the change that matches it.  A poll may
//! read an older local copy after the peer's text has already been written,
//! so an unrelated change in between must not disarm the guard.  Once the
//! echo has been swallowed, copying the same text again later is a real
//! change and is sent normally.  Text that equals `last_observed` when it
//! arrives never produces a change notification, so it does not arm the
//! guard at all.
//!
//! # Clipboard access
//!
//! [`Clipboard`] is a blocking port (the desktop clipboard lives on its own
//! thread), so every call goes through `spawn_blocking` and never stalls a
//! runtime worker.
//!
//! # Send phase
//!
//! Fan-out is sequential, one short-lived connection per peer.  While it runs
//! the phase is [`SendPhase::Sending`] and further change notifications are
//! dropped; the next clipboard poll picks up anything that was missed.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cliphop_core::{DeviceId, HistoryEntry, Message, PeerEntry, ProtocolError, TrustedSubnet};
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::application::peer_registry::PeerRegistry;

/// Title used for every desktop notification.
pub const NOTIFICATION_TITLE: &str = "Cliphop";

/// Minimum spacing between two change notifications that are acted upon.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(100);

// ── Ports ─────────────────────────────────────────────────────────────────────

/// Failure to deliver one message.  Never retried.
#[derive(Debug, Error)]
pub enum SendError {
    #[error("connection to {addr} timed out after {timeout:?}")]
    Timeout { addr: SocketAddr, timeout: Duration },
    #[error("connection refused by {addr}")]
    Refused { addr: SocketAddr },
    #[error("failed to bind outbound socket to {local}: {source}")]
    Bind {
        local: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("I/O error talking to {addr}: {source}")]
    Io {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Delivers one message to one peer over a fresh connection.
///
/// Infrastructure implementation uses TCP; test implementations record calls.
#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Returns the number of bytes written on success.
    async fn send(&self, target: SocketAddr, message: &Message) -> Result<usize, SendError>;
}

/// Error type for local clipboard access.
#[derive(Debug, Error)]
pub enum ClipboardError {
    #[error("clipboard unavailable: {0}")]
    Unavailable(String),
    #[error("clipboard access failed: {0}")]
    Access(String),
}

/// The local clipboard.  An empty clipboard reads as an empty string.
pub trait Clipboard: Send + Sync {
    fn get(&self) -> Result<String, ClipboardError>;
    fn set(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Desktop notification delivery.
#[cfg_attr(test, mockall::automock)]
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str);
}

// ── Controller types ──────────────────────────────────────────────────────────

/// Error type for explicit send requests.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("unknown peer: {0}")]
    UnknownPeer(DeviceId),
    #[error("address {0} is outside the trusted subnet")]
    UntrustedAddress(IpAddr),
    #[error(transparent)]
    Send(#[from] SendError),
}

/// Whether a fan-out is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SendPhase {
    #[default]
    Idle,
    Sending,
}

/// Fixed facts about this node.
#[derive(Debug, Clone)]
pub struct NodeIdentity {
    pub device_id: DeviceId,
    pub listen_port: u16,
    pub trust: TrustedSubnet,
}

/// User-adjustable behaviour.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub auto_send: bool,
    pub auto_receive: bool,
    pub rate_limit: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            auto_send: true,
            auto_receive: true,
            rate_limit: DEFAULT_RATE_LIMIT,
        }
    }
}

/// Per-peer results of one fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FanOutReport {
    /// Peers a connection was attempted to.
    pub attempted: usize,
    /// Peers the message was fully written to.
    pub delivered: usize,
    /// Peers skipped because they failed the trust check.
    pub skipped: usize,
}

/// What [`SyncController::on_local_clipboard_changed`] did with a change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeOutcome {
    RateLimited,
    Busy,
    AutoSendDisabled,
    Empty,
    Unchanged,
    EchoSuppressed,
    Sent(FanOutReport),
}

/// What [`SyncController::on_message_received`] did with a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Sender is not in the registry; message dropped.
    UnknownSender,
    /// Recorded in history and written to the local clipboard.
    Copied,
    /// Recorded in history only (auto-receive disabled).
    SavedToHistory,
}

#[derive(Debug, Default)]
struct SyncState {
    auto_send: bool,
    auto_receive: bool,
    phase: SendPhase,
    last_observed: Option<String>,
    last_received: Option<String>,
    last_check: Option<Instant>,
}

// ── Controller ────────────────────────────────────────────────────────────────

/// Orchestrates change detection, fan-out, and inbound handling.
pub struct SyncController {
    identity: NodeIdentity,
    rate_limit: Duration,
    registry: Arc<Mutex<PeerRegistry>>,
    sender: Arc<dyn MessageSender>,
    clipboard: Arc<dyn Clipboard>,
    notifier: Arc<dyn Notifier>,
    state: Mutex<SyncState>,
    history: Mutex<Vec<HistoryEntry>>,
}

impl SyncController {
    pub fn new(
        identity: NodeIdentity,
        settings: SyncSettings,
        registry: Arc<Mutex<PeerRegistry>>,
        sender: Arc<dyn MessageSender>,
        clipboard: Arc<dyn Clipboard>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let state = SyncState {
            auto_send: settings.auto_send,
            auto_receive: settings.auto_receive,
            ..SyncState::default()
        };
        Self {
            identity,
            rate_limit: settings.rate_limit,
            registry,
            sender,
            clipboard,
            notifier,
            state: Mutex::new(state),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.identity.device_id
    }

    pub fn listen_port(&self) -> u16 {
        self.identity.listen_port
    }

    /// Records the clipboard contents present at startup so they are not
    /// broadcast as if the user had just copied them.
    pub async fn prime(&self, current_text: &str) {
        let mut state = self.state.lock().await;
        state.last_observed = Some(current_text.to_owned());
    }

    // ── Outbound ──────────────────────────────────────────────────────────────

    /// Handles a local clipboard change notification.
    pub async fn on_local_clipboard_changed(&self, new_text: &str) -> ChangeOutcome {
        {
            let mut state = self.state.lock().await;

            let now = Instant::now();
            if let Some(last) = state.last_check {
                if now.duration_since(last) < self.rate_limit {
                    return ChangeOutcome::RateLimited;
                }
            }
            state.last_check = Some(now);

            if state.phase == SendPhase::Sending {
                debug!("send already in flight; change ignored");
                return ChangeOutcome::Busy;
            }
            if !state.auto_send {
                debug!("auto-send disabled; change ignored");
                return ChangeOutcome::AutoSendDisabled;
            }
            if new_text.is_empty() {
                return ChangeOutcome::Empty;
            }
            if state.last_observed.as_deref() == Some(new_text) {
                return ChangeOutcome::Unchanged;
            }

            state.last_observed = Some(new_text.to_owned());

            if state.last_received.as_deref() == Some(new_text) {
                state.last_received = None;
                debug!("clipboard change matches last received text; not re-sent");
                return ChangeOutcome::EchoSuppressed;
            }

            state.phase = SendPhase::Sending;
        }

        let peers = self.registry.lock().await.snapshot();
        info!(
            len = new_text.len(),
            peers = peers.len(),
            "clipboard changed; sending to peers"
        );
        let report = self.fan_out(&peers, new_text).await;

        self.state.lock().await.phase = SendPhase::Idle;
        ChangeOutcome::Sent(report)
    }

    /// Reads the local clipboard and feeds it through
    /// [`on_local_clipboard_changed`](Self::on_local_clipboard_changed) when it
    /// differs from the last observed value.
    ///
    /// Returns `None` when the clipboard is unchanged or unreadable.
    pub async fn poll_clipboard(&self) -> Option<ChangeOutcome> {
        let current = match self.read_clipboard().await {
            Ok(text) => text,
            Err(e) => {
                debug!("clipboard read failed: {e}");
                return None;
            }
        };

        {
            let state = self.state.lock().await;
            if current.is_empty() || state.last_observed.as_deref() == Some(current.as_str()) {
                return None;
            }
        }

        Some(self.on_local_clipboard_changed(&current).await)
    }

    /// Sends `text` to one registered peer, regardless of the auto-send flag.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownPeer`] if the peer is not registered,
    /// [`SyncError::UntrustedAddress`] if it fails the trust check, and
    /// [`SyncError::Send`] if delivery fails.
    pub async fn send_to_peer(&self, device_id: &DeviceId, text: &str) -> Result<usize, SyncError> {
        let peer = self
            .registry
            .lock()
            .await
            .get(device_id)
            .cloned()
            .ok_or_else(|| SyncError::UnknownPeer(device_id.clone()))?;

        if !self.identity.trust.contains(peer.interface_ip) {
            return Err(SyncError::UntrustedAddress(peer.interface_ip));
        }
        self.send_to_address(peer.socket_addr(), text).await
    }

    /// Sends `text` to an address after checking it against the trusted
    /// subnet.  Untrusted addresses are rejected before any connection is
    /// attempted.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UntrustedAddress`] or [`SyncError::Send`].
    pub async fn send_to_address(&self, target: SocketAddr, text: &str) -> Result<usize, SyncError> {
        if !self.identity.trust.contains(target.ip()) {
            return Err(SyncError::UntrustedAddress(target.ip()));
        }
        let message = Message::new(self.identity.device_id.clone(), text);
        Ok(self.sender.send(target, &message).await?)
    }

    async fn fan_out(&self, peers: &[PeerEntry], text: &str) -> FanOutReport {
        let mut report = FanOutReport::default();

        for peer in peers {
            if !peer.is_trusted(&self.identity.trust) {
                debug!(device_id = %peer.device_id, "skipping peer outside trusted subnet");
                report.skipped += 1;
                continue;
            }

            report.attempted += 1;
            match self.send_to_address(peer.socket_addr(), text).await {
                Ok(bytes) => {
                    debug!(device_id = %peer.device_id, bytes, "sent clipboard text");
                    report.delivered += 1;
                }
                Err(e) => warn!(device_id = %peer.device_id, "failed to send clipboard text: {e}"),
            }
        }

        report
    }

    // ── Inbound ───────────────────────────────────────────────────────────────

    /// Handles a message that arrived on the listener.
    pub async fn on_message_received(&self, sender_id: &DeviceId, text: &str) -> ReceiveOutcome {
        if !self.registry.lock().await.contains(sender_id) {
            warn!(sender_id = %sender_id, "message from unknown sender dropped");
            return ReceiveOutcome::UnknownSender;
        }

        info!(sender_id = %sender_id, len = text.len(), "received clipboard text");
        self.history
            .lock()
            .await
            .push(HistoryEntry::now(sender_id.clone(), text));

        let auto_receive = {
            let mut state = self.state.lock().await;
            if state.auto_receive && state.last_observed.as_deref() != Some(text) {
                state.last_received = Some(text.to_owned());
            }
            state.auto_receive
        };

        if auto_receive {
            if let Err(e) = self.write_clipboard(text).await {
                warn!("failed to write received text to clipboard: {e}");
            }
            self.notifier
                .notify(NOTIFICATION_TITLE, &format!("Text copied from {sender_id}"));
            ReceiveOutcome::Copied
        } else {
            self.notifier
                .notify(NOTIFICATION_TITLE, &format!("Text received from {sender_id}"));
            ReceiveOutcome::SavedToHistory
        }
    }

    async fn read_clipboard(&self) -> Result<String, ClipboardError> {
        let clipboard = Arc::clone(&self.clipboard);
        tokio::task::spawn_blocking(move || clipboard.get())
            .await
            .map_err(|e| ClipboardError::Access(e.to_string()))?
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), ClipboardError> {
        let clipboard = Arc::clone(&self.clipboard);
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || clipboard.set(&text))
            .await
            .map_err(|e| ClipboardError::Access(e.to_string()))?
    }

    /// Convenience wrapper for a decoded wire message.
    pub async fn handle_message(&self, message: Message) -> ReceiveOutcome {
        self.on_message_received(&message.sender_id, &message.text)
            .await
    }

    // ── History ───────────────────────────────────────────────────────────────

    /// Every accepted message, oldest first.
    pub async fn history(&self) -> Vec<HistoryEntry> {
        self.history.lock().await.clone()
    }

    /// Accepted messages from one sender, oldest first.
    pub async fn history_from(&self, sender_id: &DeviceId) -> Vec<HistoryEntry> {
        self.history
            .lock()
            .await
            .iter()
            .filter(|entry| &entry.sender_id == sender_id)
            .cloned()
            .collect()
    }

    /// Deletes all history and returns how many entries were removed.
    pub async fn clear_history(&self) -> usize {
        let mut history = self.history.lock().await;
        let removed = history.len();
        history.clear();
        removed
    }

    // ── Toggles ───────────────────────────────────────────────────────────────

    pub async fn auto_send(&self) -> bool {
        self.state.lock().await.auto_send
    }

    pub async fn set_auto_send(&self, enabled: bool) {
        self.state.lock().await.auto_send = enabled;
        info!("auto-send {}", if enabled { "enabled" } else { "disabled" });
    }

    pub async fn auto_receive(&self) -> bool {
        self.state.lock().await.auto_receive
    }

    pub async fn set_auto_receive(&self, enabled: bool) {
        self.state.lock().await.auto_receive = enabled;
        info!("auto-receive {}", if enabled { "enabled" } else { "disabled" });
    }

    pub async fn send_phase(&self) -> SendPhase {
        self.state.lock().await.phase
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

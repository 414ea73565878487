//! PeerRegistry: the node's in-memory table of known peers.
//!
//! The registry is the only owner of [`PeerEntry`] values.  The discovery pump
//! writes to it and the sync controller reads a snapshot of it when fanning
//! out a clipboard change.
//!
//! # Admission rules
//!
//! An entry is admitted only if:
//!
//! - its `device_id` is not the local node's own identity, and
//! - both its reachable address and its advertised interface address lie in
//!   the trusted subnet.
//!
//! Anything else is rejected as a no-op.  Rejection is not an error: the
//! discovery layer sees advertisements from every node on the link and most
//! of them may be outside the trusted mesh.
//!
//! # Change notifications
//!
//! Every admitted change is published as a [`PeerEvent`] on a broadcast
//! channel.  Presentation code (a tray menu, a status line) subscribes with
//! [`PeerRegistry::subscribe`] and redraws on its own schedule; the registry
//! never waits for subscribers.

use std::collections::HashMap;

use cliphop_core::{DeviceId, PeerEntry, TrustedSubnet};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the change-notification channel.  Slow subscribers that fall
/// further behind than this observe a `Lagged` error and should resync from
/// [`PeerRegistry::snapshot`].
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A change to the registry contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    Added(PeerEntry),
    Updated(PeerEntry),
    Removed(DeviceId),
}

/// Result of [`PeerRegistry::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// First advertisement seen for this identity.
    Added,
    /// A re-advertisement changed the stored entry.
    Updated,
    /// A re-advertisement matched the stored entry exactly.
    Unchanged,
    /// The advertisement carried the local node's own identity.
    RejectedSelf,
    /// At least one address is outside the trusted subnet.
    RejectedUntrusted,
}

impl UpsertOutcome {
    pub fn is_admitted(self) -> bool {
        matches!(self, Self::Added | Self::Updated | Self::Unchanged)
    }
}

/// In-memory registry of peers keyed by device identity.
///
/// Shared as `Arc<tokio::sync::Mutex<PeerRegistry>>` between the discovery
/// pump and the sync controller.
pub struct PeerRegistry {
    local_id: DeviceId,
    trust: TrustedSubnet,
    peers: HashMap<DeviceId, PeerEntry>,
    events: broadcast::Sender<PeerEvent>,
}

impl PeerRegistry {
    pub fn new(local_id: DeviceId, trust: TrustedSubnet) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local_id,
            trust,
            peers: HashMap::new(),
            events,
        }
    }

    pub fn local_id(&self) -> &DeviceId {
        &self.local_id
    }

    pub fn trust(&self) -> &TrustedSubnet {
        &self.trust
    }

    /// Inserts or updates a peer.
    pub fn upsert(&mut self, entry: PeerEntry) -> UpsertOutcome {
        if entry.device_id == self.local_id {
            return UpsertOutcome::RejectedSelf;
        }
        if !entry.is_trusted(&self.trust) {
            debug!(
                device_id = %entry.device_id,
                reachable_ip = %entry.reachable_ip,
                interface_ip = %entry.interface_ip,
                "peer rejected: address outside trusted subnet {}",
                self.trust
            );
            return UpsertOutcome::RejectedUntrusted;
        }

        match self.peers.get(&entry.device_id) {
            Some(existing) if *existing == entry => UpsertOutcome::Unchanged,
            Some(_) => {
                self.peers.insert(entry.device_id.clone(), entry.clone());
                self.publish(PeerEvent::Updated(entry));
                UpsertOutcome::Updated
            }
            None => {
                self.peers.insert(entry.device_id.clone(), entry.clone());
                self.publish(PeerEvent::Added(entry));
                UpsertOutcome::Added
            }
        }
    }

    /// Removes a peer, returning the entry it held.
    pub fn remove(&mut self, id: &DeviceId) -> Option<PeerEntry> {
        let removed = self.peers.remove(id);
        if removed.is_some() {
            self.publish(PeerEvent::Removed(id.clone()));
        }
        removed
    }

    pub fn get(&self, id: &DeviceId) -> Option<&PeerEntry> {
        self.peers.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.peers.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }

    /// Returns a copy of every entry, ordered by identity.
    pub fn snapshot(&self) -> Vec<PeerEntry> {
        let mut peers: Vec<PeerEntry> = self.peers.values().cloned().collect();
        peers.sort_by(|a, b| a.device_id.cmp(&b.device_id));
        peers
    }

    /// Subscribes to future change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.events.subscribe()
    }

    fn publish(&self, event: PeerEvent) {
        // No subscribers is the normal headless case.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::TryRecvError;

    fn make_registry() -> PeerRegistry {
        PeerRegistry::new(DeviceId::new("ALPHA"), TrustedSubnet::default())
    }

    fn make_peer(id: &str, ip: &str) -> PeerEntry {
        PeerEntry {
            device_id: DeviceId::new(id),
            hostname: id.to_lowercase(),
            reachable_ip: ip.parse().unwrap(),
            interface_ip: ip.parse().unwrap(),
            port: 5555,
        }
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = make_registry();
        assert!(registry.is_empty());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn test_upsert_adds_trusted_peer() {
        // Arrange
        let mut registry = make_registry();

        // Act
        let outcome = registry.upsert(make_peer("BETA", "172.26.0.9"));

        // Assert
        assert_eq!(outcome, UpsertOutcome::Added);
        assert!(registry.contains(&DeviceId::new("BETA")));
    }

    #[test]
    fn test_upsert_never_admits_self() {
        let mut registry = make_registry();

        let outcome = registry.upsert(make_peer("ALPHA", "172.26.0.5"));

        assert_eq!(outcome, UpsertOutcome::RejectedSelf);
        assert!(!registry.contains(&DeviceId::new("ALPHA")));
    }

    #[test]
    fn test_upsert_rejects_untrusted_reachable_address() {
        let mut registry = make_registry();
        let mut peer = make_peer("BETA", "172.26.0.9");
        peer.reachable_ip = "192.168.1.9".parse().unwrap();

        assert_eq!(registry.upsert(peer), UpsertOutcome::RejectedUntrusted);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_rejects_untrusted_interface_address() {
        let mut registry = make_registry();
        let mut peer = make_peer("BETA", "172.26.0.9");
        peer.interface_ip = "10.0.0.9".parse().unwrap();

        assert_eq!(registry.upsert(peer), UpsertOutcome::RejectedUntrusted);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_upsert_same_id_with_new_address_updates_in_place() {
        // Arrange
        let mut registry = make_registry();
        registry.upsert(make_peer("BETA", "172.26.0.9"));

        // Act
        let outcome = registry.upsert(make_peer("BETA", "172.26.0.10"));

        // Assert: one entry, carrying the new address.
        assert_eq!(outcome, UpsertOutcome::Updated);
        assert_eq!(registry.len(), 1);
        let entry = registry.get(&DeviceId::new("BETA")).unwrap();
        assert_eq!(entry.reachable_ip.to_string(), "172.26.0.10");
    }

    #[test]
    fn test_upsert_identical_readvertisement_is_unchanged() {
        let mut registry = make_registry();
        registry.upsert(make_peer("BETA", "172.26.0.9"));

        assert_eq!(
            registry.upsert(make_peer("BETA", "172.26.0.9")),
            UpsertOutcome::Unchanged
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_remove_deletes_peer() {
        let mut registry = make_registry();
        registry.upsert(make_peer("BETA", "172.26.0.9"));

        let removed = registry.remove(&DeviceId::new("BETA"));

        assert!(removed.is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove_unknown_peer_is_noop() {
        let mut registry = make_registry();
        assert!(registry.remove(&DeviceId::new("GHOST")).is_none());
    }

    #[test]
    fn test_snapshot_is_ordered_by_device_id() {
        let mut registry = make_registry();
        registry.upsert(make_peer("GAMMA", "172.26.0.11"));
        registry.upsert(make_peer("BETA", "172.26.0.9"));
        registry.upsert(make_peer("DELTA", "172.26.0.12"));

        let ids: Vec<String> = registry
            .snapshot()
            .into_iter()
            .map(|p| p.device_id.to_string())
            .collect();

        assert_eq!(ids, vec!["BETA", "DELTA", "GAMMA"]);
    }

    #[test]
    fn test_subscribers_observe_add_update_remove() {
        // Arrange
        let mut registry = make_registry();
        let mut rx = registry.subscribe();

        // Act
        registry.upsert(make_peer("BETA", "172.26.0.9"));
        registry.upsert(make_peer("BETA", "172.26.0.9")); // unchanged: no event
        registry.upsert(make_peer("BETA", "172.26.0.10"));
        registry.upsert(make_peer("ALPHA", "172.26.0.5")); // self: no event
        registry.remove(&DeviceId::new("BETA"));

        // Assert
        assert!(matches!(rx.try_recv(), Ok(PeerEvent::Added(p)) if p.device_id.as_str() == "BETA"));
        assert!(matches!(rx.try_recv(), Ok(PeerEvent::Updated(p)) if p.reachable_ip.to_string() == "172.26.0.10"));
        assert_eq!(rx.try_recv(), Ok(PeerEvent::Removed(DeviceId::new("BETA"))));
        assert_eq!(rx.try_recv(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_is_admitted_classifies_outcomes() {
        assert!(UpsertOutcome::Added.is_admitted());
        assert!(UpsertOutcome::Updated.is_admitted());
        assert!(UpsertOutcome::Unchanged.is_admitted());
        assert!(!UpsertOutcome::RejectedSelf.is_admitted());
        assert!(!UpsertOutcome::RejectedUntrusted.is_admitted());
    }
}

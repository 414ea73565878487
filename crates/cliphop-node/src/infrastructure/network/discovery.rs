//! mDNS/DNS-SD advertisement and peer discovery.
//!
//! Every node registers one service instance of type `_cliphop._tcp.local.`
//! whose instance name is its device ID.  The instance carries three TXT
//! properties:
//!
//! | key         | value                                   |
//! |-------------|-----------------------------------------|
//! | `device_id` | the advertising node's identity         |
//! | `hostname`  | full host name, for display             |
//! | `interface` | the local address the node listens on   |
//!
//! The same daemon browses for that service type.  Resolved and removed
//! services are converted into [`DiscoveryEvent`]s on a dedicated thread and
//! handed to the async side over a Tokio channel, where
//! [`pump_discovery_events`] applies them to the [`PeerRegistry`].
//!
//! # How mDNS discovery works (for beginners)
//!
//! Multicast DNS lets machines on one link answer DNS questions without a DNS
//! server.  DNS-SD layers "service discovery" on top: a browser asks "who
//! offers `_cliphop._tcp`?" and every node that registered that service
//! answers with its instance name, address, port and TXT key/value pairs.
//! When a node shuts down cleanly it sends a "goodbye" and browsers report the
//! service as removed.
//!
//! # Threading
//!
//! `mdns-sd` runs its own daemon thread and exposes events on a blocking
//! channel.  A small "cliphop-discovery" thread drains that channel with a
//! 500 ms timeout, checking a shared `running` flag between receives, and
//! forwards events with `blocking_send`.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread::JoinHandle;
use std::time::Duration;

use cliphop_core::{DeviceId, PeerEntry, TrustedSubnet};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::application::peer_registry::{PeerRegistry, UpsertOutcome};

pub const PROP_DEVICE_ID: &str = "device_id";
pub const PROP_HOSTNAME: &str = "hostname";
pub const PROP_INTERFACE: &str = "interface";

/// Shown when a peer omits the `hostname` property.
pub const UNKNOWN_HOSTNAME: &str = "Unknown";

const BROWSE_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Error type for discovery start-up.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("failed to start mDNS daemon: {0}")]
    Daemon(String),
    #[error("failed to register service {fullname}: {reason}")]
    Register { fullname: String, reason: String },
    #[error("failed to browse {service_type}: {reason}")]
    Browse { service_type: String, reason: String },
    #[error("failed to spawn discovery thread: {0}")]
    Spawn(#[source] std::io::Error),
}

/// Why a resolved service could not become a [`PeerEntry`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("missing or empty property '{0}'")]
    MissingProperty(&'static str),
    #[error("property '{0}' is not valid UTF-8")]
    NotUtf8(&'static str),
    #[error("interface property '{0}' is not an IP address")]
    InvalidInterface(String),
    #[error("service resolved without any address")]
    NoAddress,
}

/// The parts of a resolved service the node cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub fullname: String,
    pub addresses: Vec<IpAddr>,
    pub port: u16,
    pub properties: HashMap<String, Vec<u8>>,
}

impl ServiceRecord {
    fn from_info(info: &ServiceInfo) -> Self {
        let mut addresses: Vec<IpAddr> = info.get_addresses().iter().copied().collect();
        addresses.sort();
        let properties = info
            .get_properties()
            .iter()
            .map(|prop| {
                (
                    prop.key().to_string(),
                    prop.val().map(<[u8]>::to_vec).unwrap_or_default(),
                )
            })
            .collect();
        Self {
            fullname: info.get_fullname().to_string(),
            addresses,
            port: info.get_port(),
            properties,
        }
    }

    fn property(&self, key: &'static str) -> Result<Option<String>, RecordError> {
        match self.properties.get(key) {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes.clone())
                .map(Some)
                .map_err(|_| RecordError::NotUtf8(key)),
        }
    }
}

/// A change seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Resolved(ServiceRecord),
    Removed { fullname: String },
}

/// What this node advertises about itself.
#[derive(Debug, Clone)]
pub struct Advertisement {
    pub device_id: DeviceId,
    pub hostname: String,
    pub interface_ip: IpAddr,
    pub port: u16,
}

impl Advertisement {
    fn properties(&self) -> HashMap<String, String> {
        HashMap::from([
            (PROP_DEVICE_ID.to_string(), self.device_id.to_string()),
            (PROP_HOSTNAME.to_string(), self.hostname.clone()),
            (PROP_INTERFACE.to_string(), self.interface_ip.to_string()),
        ])
    }

    /// mDNS host names must end in `.local.`.
    fn mdns_host_name(&self) -> String {
        let label: String = self
            .hostname
            .chars()
            .filter(|c| c.is_ascii_alphanumeric() || *c == '-')
            .collect();
        if label.is_empty() {
            format!("{}.local.", self.device_id.as_str().to_lowercase())
        } else {
            format!("{label}.local.")
        }
    }
}

// ── Record interpretation ─────────────────────────────────────────────────────

/// Builds a [`PeerEntry`] from a resolved service.
///
/// `device_id` and `interface` are required.  When the service resolves to
/// several addresses, a trusted IPv4 address is preferred, then any IPv4
/// address, then whatever is left.
///
/// # Errors
///
/// Returns a [`RecordError`] describing the first problem found.
pub fn peer_from_record(record: &ServiceRecord, trust: &TrustedSubnet) -> Result<PeerEntry, RecordError> {
    let device_id = record
        .property(PROP_DEVICE_ID)?
        .filter(|id| !id.is_empty())
        .ok_or(RecordError::MissingProperty(PROP_DEVICE_ID))?;

    let interface = record
        .property(PROP_INTERFACE)?
        .filter(|ip| !ip.is_empty())
        .ok_or(RecordError::MissingProperty(PROP_INTERFACE))?;
    let interface_ip: IpAddr = interface
        .trim()
        .parse()
        .map_err(|_| RecordError::InvalidInterface(interface.clone()))?;

    let hostname = record
        .property(PROP_HOSTNAME)?
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| UNKNOWN_HOSTNAME.to_string());

    let reachable_ip = record
        .addresses
        .iter()
        .find(|ip| ip.is_ipv4() && trust.contains(**ip))
        .or_else(|| record.addresses.iter().find(|ip| ip.is_ipv4()))
        .or_else(|| record.addresses.first())
        .copied()
        .ok_or(RecordError::NoAddress)?;

    Ok(PeerEntry {
        device_id: DeviceId::new(device_id),
        hostname,
        reachable_ip,
        interface_ip,
        port: record.port,
    })
}

/// Recovers the device ID from a service's full name.
///
/// `"LAPTOP._cliphop._tcp.local."` yields `LAPTOP`.  Names that do not end in
/// `service_type` fall back to their first dot-separated label.
pub fn device_id_from_fullname(fullname: &str, service_type: &str) -> Option<DeviceId> {
    let instance = fullname
        .strip_suffix(service_type)
        .and_then(|rest| rest.strip_suffix('.'))
        .or_else(|| fullname.split('.').next())?;
    if instance.is_empty() {
        return None;
    }
    Some(DeviceId::new(instance))
}

/// The effect one [`DiscoveryEvent`] had on the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppliedEvent {
    Upserted(UpsertOutcome),
    Removed(Option<PeerEntry>),
    Invalid(RecordError),
    UnrecognisedName,
}

/// Applies one event to the registry.
pub fn apply_discovery_event(
    registry: &mut PeerRegistry,
    event: DiscoveryEvent,
    service_type: &str,
) -> AppliedEvent {
    match event {
        DiscoveryEvent::Resolved(record) => match peer_from_record(&record, registry.trust()) {
            Ok(peer) => {
                let summary = format!(
                    "{} ({}) at {}:{} (interface: {})",
                    peer.device_id, peer.hostname, peer.reachable_ip, peer.port, peer.interface_ip
                );
                let outcome = registry.upsert(peer);
                match outcome {
                    UpsertOutcome::Added => info!("found peer {summary}"),
                    UpsertOutcome::Updated => info!("peer updated: {summary}"),
                    UpsertOutcome::Unchanged | UpsertOutcome::RejectedSelf => {}
                    UpsertOutcome::RejectedUntrusted => {
                        warn!("ignoring peer {summary}: address outside trusted subnet")
                    }
                }
                AppliedEvent::Upserted(outcome)
            }
            Err(e) => {
                debug!("ignoring service {}: {e}", record.fullname);
                AppliedEvent::Invalid(e)
            }
        },
        DiscoveryEvent::Removed { fullname } => {
            match device_id_from_fullname(&fullname, service_type) {
                Some(id) => {
                    let removed = registry.remove(&id);
                    if removed.is_some() {
                        info!("peer {id} left");
                    }
                    AppliedEvent::Removed(removed)
                }
                None => AppliedEvent::UnrecognisedName,
            }
        }
    }
}

/// Drains discovery events into the shared registry until the channel closes.
pub async fn pump_discovery_events(
    mut rx: mpsc::Receiver<DiscoveryEvent>,
    registry: Arc<Mutex<PeerRegistry>>,
    service_type: String,
) {
    while let Some(event) = rx.recv().await {
        let mut registry = registry.lock().await;
        apply_discovery_event(&mut registry, event, &service_type);
    }
    debug!("discovery event channel closed");
}

// ── mDNS service ──────────────────────────────────────────────────────────────

/// A registered advertisement plus a running browser.
pub struct DiscoveryService {
    daemon: ServiceDaemon,
    service_type: String,
    fullname: String,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

impl DiscoveryService {
    /// Registers `ad` and starts browsing for `service_type`.
    ///
    /// # Errors
    ///
    /// Returns [`DiscoveryError`] if the daemon cannot start, the service
    /// cannot be registered or browsed, or the thread cannot be spawned.
    pub fn start(
        service_type: &str,
        ad: &Advertisement,
        tx: mpsc::Sender<DiscoveryEvent>,
    ) -> Result<Self, DiscoveryError> {
        let daemon = ServiceDaemon::new().map_err(|e| DiscoveryError::Daemon(e.to_string()))?;

        let ip = ad.interface_ip.to_string();
        let info = ServiceInfo::new(
            service_type,
            ad.device_id.as_str(),
            &ad.mdns_host_name(),
            ip.as_str(),
            ad.port,
            ad.properties(),
        )
        .map_err(|e| DiscoveryError::Register {
            fullname: format!("{}.{service_type}", ad.device_id),
            reason: e.to_string(),
        })?;
        let fullname = info.get_fullname().to_string();

        daemon
            .register(info)
            .map_err(|e| DiscoveryError::Register {
                fullname: fullname.clone(),
                reason: e.to_string(),
            })?;
        info!(
            "advertising {fullname} ({}) on {}:{}",
            ad.hostname, ad.interface_ip, ad.port
        );

        let events = daemon.browse(service_type).map_err(|e| DiscoveryError::Browse {
            service_type: service_type.to_string(),
            reason: e.to_string(),
        })?;

        let running = Arc::new(AtomicBool::new(true));
        let thread_running = Arc::clone(&running);
        let thread = std::thread::Builder::new()
            .name("cliphop-discovery".to_string())
            .spawn(move || {
                while thread_running.load(Ordering::Relaxed) {
                    let event = match events.recv_timeout(BROWSE_POLL_INTERVAL) {
                        Ok(event) => event,
                        Err(_) if events.is_disconnected() => break,
                        Err(_) => continue,
                    };
                    let forwarded = match event {
                        ServiceEvent::ServiceResolved(info) => {
                            DiscoveryEvent::Resolved(ServiceRecord::from_info(&info))
                        }
                        ServiceEvent::ServiceRemoved(_, fullname) => {
                            DiscoveryEvent::Removed { fullname }
                        }
                        other => {
                            debug!("mdns: {other:?}");
                            continue;
                        }
                    };
                    if tx.blocking_send(forwarded).is_err() {
                        break;
                    }
                }
                debug!("discovery thread exiting");
            })
            .map_err(DiscoveryError::Spawn)?;

        Ok(Self {
            daemon,
            service_type: service_type.to_string(),
            fullname,
            running,
            thread: Some(thread),
        })
    }

    pub fn fullname(&self) -> &str {
        &self.fullname
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Withdraws the advertisement and stops browsing.
    ///
    /// Errors from the daemon are logged and otherwise ignored; calling this
    /// twice is harmless.
    pub fn stop(&mut self) {
        if !self.running.swap(false, Ordering::Relaxed) {
            return;
        }
        if let Err(e) = self.daemon.unregister(&self.fullname) {
            debug!("unregister {}: {e}", self.fullname);
        }
        if let Err(e) = self.daemon.stop_browse(&self.service_type) {
            debug!("stop_browse {}: {e}", self.service_type);
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("mdns daemon shutdown: {e}");
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("discovery thread panicked");
            }
        }
        info!("discovery stopped");
    }
}

impl Drop for DiscoveryService {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const SERVICE: &str = "_cliphop._tcp.local.";

    fn make_record(props: &[(&str, &str)], addresses: &[&str]) -> ServiceRecord {
        ServiceRecord {
            fullname: format!("BETA.{SERVICE}"),
            addresses: addresses.iter().map(|a| a.parse().unwrap()).collect(),
            port: 5556,
            properties: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.as_bytes().to_vec()))
                .collect(),
        }
    }

    fn full_props() -> Vec<(&'static str, &'static str)> {
        vec![
            (PROP_DEVICE_ID, "BETA"),
            (PROP_HOSTNAME, "beta.example"),
            (PROP_INTERFACE, "172.26.0.9"),
        ]
    }

    fn make_registry() -> PeerRegistry {
        PeerRegistry::new(DeviceId::new("ALPHA"), TrustedSubnet::default())
    }

    // ── peer_from_record ──────────────────────────────────────────────────────

    #[test]
    fn test_record_with_all_properties_becomes_peer() {
        // Arrange
        let record = make_record(&full_props(), &["172.26.0.9"]);

        // Act
        let peer = peer_from_record(&record, &TrustedSubnet::default()).unwrap();

        // Assert
        assert_eq!(peer.device_id.as_str(), "BETA");
        assert_eq!(peer.hostname, "beta.example");
        assert_eq!(peer.reachable_ip.to_string(), "172.26.0.9");
        assert_eq!(peer.interface_ip.to_string(), "172.26.0.9");
        assert_eq!(peer.port, 5556);
    }

    #[test]
    fn test_missing_hostname_defaults_to_unknown() {
        let record = make_record(
            &[(PROP_DEVICE_ID, "BETA"), (PROP_INTERFACE, "172.26.0.9")],
            &["172.26.0.9"],
        );

        let peer = peer_from_record(&record, &TrustedSubnet::default()).unwrap();

        assert_eq!(peer.hostname, UNKNOWN_HOSTNAME);
    }

    #[test]
    fn test_missing_device_id_is_rejected() {
        let record = make_record(&[(PROP_INTERFACE, "172.26.0.9")], &["172.26.0.9"]);
        assert_eq!(
            peer_from_record(&record, &TrustedSubnet::default()),
            Err(RecordError::MissingProperty(PROP_DEVICE_ID))
        );
    }

    #[test]
    fn test_missing_interface_is_rejected() {
        let record = make_record(&[(PROP_DEVICE_ID, "BETA")], &["172.26.0.9"]);
        assert_eq!(
            peer_from_record(&record, &TrustedSubnet::default()),
            Err(RecordError::MissingProperty(PROP_INTERFACE))
        );
    }

    #[test]
    fn test_garbage_interface_is_rejected() {
        let record = make_record(
            &[(PROP_DEVICE_ID, "BETA"), (PROP_INTERFACE, "zt0")],
            &["172.26.0.9"],
        );
        assert!(matches!(
            peer_from_record(&record, &TrustedSubnet::default()),
            Err(RecordError::InvalidInterface(_))
        ));
    }

    #[test]
    fn test_record_without_addresses_is_rejected() {
        let record = make_record(&full_props(), &[]);
        assert_eq!(
            peer_from_record(&record, &TrustedSubnet::default()),
            Err(RecordError::NoAddress)
        );
    }

    #[test]
    fn test_trusted_address_is_preferred_among_several() {
        let record = make_record(&full_props(), &["fe80::1", "10.0.0.3", "172.26.0.9"]);

        let peer = peer_from_record(&record, &TrustedSubnet::default()).unwrap();

        assert_eq!(peer.reachable_ip.to_string(), "172.26.0.9");
    }

    // ── device_id_from_fullname ───────────────────────────────────────────────

    #[test]
    fn test_device_id_from_fullname_strips_service_type() {
        let id = device_id_from_fullname("LAPTOP._cliphop._tcp.local.", SERVICE).unwrap();
        assert_eq!(id.as_str(), "LAPTOP");
    }

    #[test]
    fn test_device_id_from_fullname_keeps_dots_in_instance() {
        let id = device_id_from_fullname("desk.one._cliphop._tcp.local.", SERVICE).unwrap();
        assert_eq!(id.as_str(), "desk.one");
    }

    #[test]
    fn test_device_id_from_foreign_fullname_uses_first_label() {
        let id = device_id_from_fullname("BETA._other._tcp.local.", SERVICE).unwrap();
        assert_eq!(id.as_str(), "BETA");
    }

    #[test]
    fn test_device_id_from_empty_fullname_is_none() {
        assert!(device_id_from_fullname("", SERVICE).is_none());
        assert!(device_id_from_fullname(&format!(".{SERVICE}"), SERVICE).is_none());
    }

    // ── apply_discovery_event ─────────────────────────────────────────────────

    #[test]
    fn test_resolved_then_removed_round_trips_registry() {
        // Arrange
        let mut registry = make_registry();
        let resolved = DiscoveryEvent::Resolved(make_record(&full_props(), &["172.26.0.9"]));

        // Act
        let added = apply_discovery_event(&mut registry, resolved, SERVICE);
        let removed = apply_discovery_event(
            &mut registry,
            DiscoveryEvent::Removed {
                fullname: format!("BETA.{SERVICE}"),
            },
            SERVICE,
        );

        // Assert
        assert_eq!(added, AppliedEvent::Upserted(UpsertOutcome::Added));
        assert!(matches!(removed, AppliedEvent::Removed(Some(_))));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_own_advertisement_is_ignored() {
        let mut registry = make_registry();
        let record = make_record(
            &[(PROP_DEVICE_ID, "ALPHA"), (PROP_INTERFACE, "172.26.0.5")],
            &["172.26.0.5"],
        );

        let applied = apply_discovery_event(&mut registry, DiscoveryEvent::Resolved(record), SERVICE);

        assert_eq!(applied, AppliedEvent::Upserted(UpsertOutcome::RejectedSelf));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_untrusted_interface_is_not_admitted() {
        let mut registry = make_registry();
        let record = make_record(
            &[(PROP_DEVICE_ID, "BETA"), (PROP_INTERFACE, "192.168.1.9")],
            &["172.26.0.9"],
        );

        let applied = apply_discovery_event(&mut registry, DiscoveryEvent::Resolved(record), SERVICE);

        assert_eq!(applied, AppliedEvent::Upserted(UpsertOutcome::RejectedUntrusted));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_removal_of_unknown_peer_is_noop() {
        let mut registry = make_registry();
        let applied = apply_discovery_event(
            &mut registry,
            DiscoveryEvent::Removed {
                fullname: format!("GHOST.{SERVICE}"),
            },
            SERVICE,
        );
        assert_eq!(applied, AppliedEvent::Removed(None));
    }

    #[tokio::test]
    async fn test_pump_applies_events_until_channel_closes() {
        // Arrange
        let registry = Arc::new(Mutex::new(make_registry()));
        let (tx, rx) = mpsc::channel(8);
        let pump = tokio::spawn(pump_discovery_events(
            rx,
            Arc::clone(&registry),
            SERVICE.to_string(),
        ));

        // Act
        tx.send(DiscoveryEvent::Resolved(make_record(&full_props(), &["172.26.0.9"])))
            .await
            .unwrap();
        drop(tx);
        pump.await.unwrap();

        // Assert
        assert!(registry.lock().await.contains(&DeviceId::new("BETA")));
    }

    #[test]
    fn test_advertisement_properties_and_host_name() {
        let ad = Advertisement {
            device_id: DeviceId::new("ALPHA"),
            hostname: "alpha.corp".to_string(),
            interface_ip: "172.26.0.5".parse().unwrap(),
            port: 5555,
        };

        let props = ad.properties();

        assert_eq!(props[PROP_DEVICE_ID], "ALPHA");
        assert_eq!(props[PROP_HOSTNAME], "alpha.corp");
        assert_eq!(props[PROP_INTERFACE], "172.26.0.5");
        assert_eq!(ad.mdns_host_name(), "alphacorp.local.");
    }

    #[test]
    fn test_stop_twice_then_drop_joins_browse_thread() {
        // Arrange: a throwaway service type so no real node answers.
        let (tx, _rx) = mpsc::channel(64);
        let ad = Advertisement {
            device_id: DeviceId::new("STOPTEST"),
            hostname: "stoptest".to_string(),
            interface_ip: "127.0.0.1".parse().unwrap(),
            port: 5599,
        };
        let mut service = match DiscoveryService::start("_cliphopstop._tcp.local.", &ad, tx) {
            Ok(service) => service,
            Err(e) => {
                // No multicast-capable daemon in this environment.
                eprintln!("skipping: {e}");
                return;
            }
        };
        assert!(service.is_running());

        // Act
        service.stop();
        service.stop();

        // Assert
        assert!(!service.is_running());
        assert!(service.thread.is_none(), "browse thread should be joined");
        drop(service);
    }
}

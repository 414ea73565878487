//! Peer entries tracked by the registry.

use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::domain::identity::DeviceId;
use crate::domain::subnet::TrustedSubnet;

/// A remote node that advertised itself on the network.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    /// Identity the peer advertised.
    pub device_id: DeviceId,
    /// Full host name, for display only.
    pub hostname: String,
    /// Address the discovery layer resolved for the peer.
    pub reachable_ip: IpAddr,
    /// Interface address the peer advertised for itself.
    pub interface_ip: IpAddr,
    /// TCP port the peer's listener is bound to.
    pub port: u16,
}

impl PeerEntry {
    /// Address to open a connection to.
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.reachable_ip, self.port)
    }

    /// Both addresses must be inside the trusted subnet.
    pub fn is_trusted(&self, subnet: &TrustedSubnet) -> bool {
        subnet.contains(self.reachable_ip) && subnet.contains(self.interface_ip)
    }
}

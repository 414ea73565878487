//! Local address selection.
//!
//! A node needs one local IPv4 address to listen on, to bind outbound
//! connections to, and to advertise as its `interface` property.  On a
//! machine with a VPN mesh adapter that address must be the mesh address,
//! otherwise peers would reject us.
//!
//! [`AddressResolver::resolve`] tries, in order:
//!
//! 1. An interface address inside the trusted subnet.
//! 2. The first non-loopback, non-link-local IPv4 interface address.
//! 3. The source address the OS would use for a default-route destination
//!    (a UDP `connect`, which sends no packets).
//! 4. An address the local host name resolves to.
//! 5. `127.0.0.1`.
//!
//! Resolution never fails; the caller decides whether an untrusted result
//! is worth a warning.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, ToSocketAddrs, UdpSocket};

use cliphop_core::TrustedSubnet;
use tracing::{debug, info};

/// Which step of the fallback chain produced an address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddressSource {
    TrustedInterface(String),
    FirstInterface(String),
    DefaultRoute,
    Hostname,
    Loopback,
}

impl fmt::Display for AddressSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TrustedInterface(name) => write!(f, "trusted interface {name}"),
            Self::FirstInterface(name) => write!(f, "interface {name}"),
            Self::DefaultRoute => f.write_str("default route"),
            Self::Hostname => f.write_str("host name lookup"),
            Self::Loopback => f.write_str("loopback fallback"),
        }
    }
}

/// The chosen local address and how it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub ip: IpAddr,
    pub source: AddressSource,
}

/// Picks the node's local address.
#[derive(Debug, Clone, Copy)]
pub struct AddressResolver {
    trust: TrustedSubnet,
}

impl AddressResolver {
    pub fn new(trust: TrustedSubnet) -> Self {
        Self { trust }
    }

    /// Runs the full fallback chain.
    pub fn resolve(&self) -> ResolvedAddress {
        let interfaces = match local_ip_address::list_afinet_netifas() {
            Ok(list) => list,
            Err(e) => {
                debug!("interface enumeration failed: {e}");
                Vec::new()
            }
        };

        let resolved = select_interface_address(&interfaces, &self.trust)
            .or_else(default_route_address)
            .or_else(hostname_address)
            .unwrap_or(ResolvedAddress {
                ip: IpAddr::V4(Ipv4Addr::LOCALHOST),
                source: AddressSource::Loopback,
            });

        info!(ip = %resolved.ip, "local address selected via {}", resolved.source);
        resolved
    }

    /// `true` iff `addr` parses and lies inside the trusted subnet.
    pub fn is_valid(&self, addr: &str) -> bool {
        self.trust.contains_str(addr)
    }

    pub fn trust(&self) -> &TrustedSubnet {
        &self.trust
    }
}

/// Chooses among enumerated `(interface name, address)` pairs.
///
/// Only IPv4 addresses are considered; loopback and link-local
/// (`169.254.0.0/16`) addresses are never chosen.
pub fn select_interface_address(
    interfaces: &[(String, IpAddr)],
    trust: &TrustedSubnet,
) -> Option<ResolvedAddress> {
    let usable = || {
        interfaces.iter().filter(|(_, ip)| match ip {
            IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_link_local(),
            IpAddr::V6(_) => false,
        })
    };

    if let Some((name, ip)) = usable().find(|(_, ip)| trust.contains(*ip)) {
        return Some(ResolvedAddress {
            ip: *ip,
            source: AddressSource::TrustedInterface(name.clone()),
        });
    }

    usable().next().map(|(name, ip)| ResolvedAddress {
        ip: *ip,
        source: AddressSource::FirstInterface(name.clone()),
    })
}

fn default_route_address() -> Option<ResolvedAddress> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(("8.8.8.8", 1)).ok()?;
    let ip = socket.local_addr().ok()?.ip();
    if ip.is_unspecified() || ip.is_loopback() {
        return None;
    }
    Some(ResolvedAddress {
        ip,
        source: AddressSource::DefaultRoute,
    })
}

fn hostname_address() -> Option<ResolvedAddress> {
    let hostname = gethostname::gethostname().to_string_lossy().into_owned();
    let ip = (hostname.as_str(), 0)
        .to_socket_addrs()
        .ok()?
        .map(|addr| addr.ip())
        .find(|ip| ip.is_ipv4() && !ip.is_loopback())?;
    Some(ResolvedAddress {
        ip,
        source: AddressSource::Hostname,
    })
}

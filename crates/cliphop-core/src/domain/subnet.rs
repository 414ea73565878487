//! Trusted-subnet predicate.
//!
//! Cliphop has no peer authentication.  The only access control is that both
//! the address a peer is reached at and the interface address it advertises
//! must fall inside one configured IPv4 subnet (typically the subnet of a VPN
//! mesh such as `172.26.0.0/16`).  Every admission into the peer registry and
//! every outbound send goes through [`TrustedSubnet::contains`].

use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error returned when a subnet string cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SubnetParseError {
    /// The network part is not a dotted IPv4 address.
    #[error("invalid network address in subnet '{0}'")]
    InvalidAddress(String),
    /// The prefix length is not a number in `0..=32`.
    #[error("invalid prefix length in subnet '{0}'")]
    InvalidPrefix(String),
}

/// An IPv4 network in CIDR form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TrustedSubnet {
    network: Ipv4Addr,
    prefix_len: u8,
}

impl TrustedSubnet {
    /// Builds a subnet, clearing any host bits in `network`.
    ///
    /// Prefix lengths above 32 are clamped to 32.
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Self {
        let prefix_len = prefix_len.min(32);
        let masked = u32::from(network) & mask(prefix_len);
        Self {
            network: Ipv4Addr::from(masked),
            prefix_len,
        }
    }

    pub fn network(&self) -> Ipv4Addr {
        self.network
    }

    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Returns `true` iff `addr` lies inside this subnet.
    ///
    /// IPv6 addresses are only accepted in their IPv4-mapped form
    /// (`::ffff:a.b.c.d`); every other IPv6 address is outside the subnet.
    pub fn contains(&self, addr: IpAddr) -> bool {
        let v4 = match addr {
            IpAddr::V4(v4) => v4,
            IpAddr::V6(v6) => match v6.to_ipv4_mapped() {
                Some(v4) => v4,
                None => return false,
            },
        };
        u32::from(v4) & mask(self.prefix_len) == u32::from(self.network)
    }

    /// String form of [`contains`](Self::contains) for addresses that arrive
    /// as text (discovery properties).  Unparseable text is never valid.
    pub fn contains_str(&self, addr: &str) -> bool {
        addr.trim()
            .parse::<IpAddr>()
            .map(|ip| self.contains(ip))
            .unwrap_or(false)
    }
}

fn mask(prefix_len: u8) -> u32 {
    if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len))
    }
}

impl Default for TrustedSubnet {
    fn default() -> Self {
        Self::new(Ipv4Addr::new(172, 26, 0, 0), 16)
    }
}

impl fmt::Display for TrustedSubnet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for TrustedSubnet {
    type Err = SubnetParseError;

    /// Parses `a.b.c.d/n`.  A bare address is treated as `/32`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (addr_part, prefix_part) = match s.split_once('/') {
            Some((addr, prefix)) => (addr, Some(prefix)),
            None => (s, None),
        };

        let network = addr_part
            .parse::<Ipv4Addr>()
            .map_err(|_| SubnetParseError::InvalidAddress(s.to_string()))?;

        let prefix_len = match prefix_part {
            Some(p) => p
                .parse::<u8>()
                .ok()
                .filter(|len| *len <= 32)
                .ok_or_else(|| SubnetParseError::InvalidPrefix(s.to_string()))?,
            None => 32,
        };

        Ok(Self::new(network, prefix_len))
    }
}

impl TryFrom<String> for TrustedSubnet {
    type Error = SubnetParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<TrustedSubnet> for String {
    fn from(subnet: TrustedSubnet) -> Self {
        subnet.to_string()
    }
}

//! Device identity derived from the host name.
//!
//! Every node identifies itself with a short, upper-case token built from the
//! machine's host name.  The same host always yields the same identity, so a
//! restarted node is recognised by its peers without any stored state.
//!
//! Collisions are possible (two hosts named `laptop` and `LAPTOP!` map to the
//! same identity); the protocol accepts that limitation.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Maximum number of characters kept from the host name.
pub const MAX_DEVICE_ID_LEN: usize = 20;

/// Identity used when the host name contains no usable characters.
pub const FALLBACK_DEVICE_ID: &str = "CLIPHOP-NODE";

/// Identity of a node on the network.
///
/// Values that arrive over the wire are kept verbatim (see [`DeviceId::new`]);
/// only [`DeviceId::from_hostname`] applies the normalisation rules.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    /// Wraps an identity string exactly as received.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Derives the identity for a host name.
    ///
    /// Keeps alphanumerics, `-` and `_`, upper-cases them and truncates the
    /// result to [`MAX_DEVICE_ID_LEN`] characters.  Upper-casing happens first
    /// because some characters expand (`ß` becomes `SS`).
    ///
    /// # Examples
    ///
    /// ```rust
    /// use cliphop_core::DeviceId;
    ///
    /// let id = DeviceId::from_hostname("dev-box.local");
    /// assert_eq!(id.as_str(), "DEV-BOXLOCAL");
    /// ```
    pub fn from_hostname(hostname: &str) -> Self {
        let cleaned: String = hostname
            .chars()
            .filter(|c| c.is_alphanumeric() || *c == '-' || *c == '_')
            .flat_map(char::to_uppercase)
            .take(MAX_DEVICE_ID_LEN)
            .collect();

        if cleaned.is_empty() {
            return Self(FALLBACK_DEVICE_ID.to_string());
        }
        Self(cleaned)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceId {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<String> for DeviceId {
    fn from(raw: String) -> Self {
        Self(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_hostname_upper_cases_plain_name() {
        assert_eq!(DeviceId::from_hostname("alpha").as_str(), "ALPHA");
    }

    #[test]
    fn test_from_hostname_strips_disallowed_characters() {
        // Arrange
        let hostname = "my.host name!@#_x-1";

        // Act
        let id = DeviceId::from_hostname(hostname);

        // Assert
        assert_eq!(id.as_str(), "MYHOSTNAME_X-1");
    }

    #[test]
    fn test_from_hostname_truncates_to_max_length() {
        let id = DeviceId::from_hostname("abcdefghijklmnopqrstuvwxyz");
        assert_eq!(id.as_str().chars().count(), MAX_DEVICE_ID_LEN);
        assert_eq!(id.as_str(), "ABCDEFGHIJKLMNOPQRST");
    }

    #[test]
    fn test_from_hostname_truncates_after_filtering() {
        // Dots are removed before the length cap is applied.
        let id = DeviceId::from_hostname("a.b.c.d.e.f.g.h.i.j.k.l.m.n.o.p.q.r.s.t.u");
        assert_eq!(id.as_str(), "ABCDEFGHIJKLMNOPQRST");
    }

    #[test]
    fn test_from_hostname_caps_length_after_expanding_upper_case() {
        // Each `ß` upper-cases to two characters.
        let id = DeviceId::from_hostname(&"ß".repeat(MAX_DEVICE_ID_LEN));

        assert_eq!(id.as_str().chars().count(), MAX_DEVICE_ID_LEN);
        assert_eq!(id.as_str(), "S".repeat(MAX_DEVICE_ID_LEN));
    }

    #[test]
    fn test_from_hostname_is_stable_across_calls() {
        assert_eq!(
            DeviceId::from_hostname("Build-Server_01"),
            DeviceId::from_hostname("Build-Server_01")
        );
    }

    #[test]
    fn test_from_hostname_falls_back_when_nothing_survives_filtering() {
        assert_eq!(DeviceId::from_hostname("...").as_str(), FALLBACK_DEVICE_ID);
        assert_eq!(DeviceId::from_hostname("").as_str(), FALLBACK_DEVICE_ID);
    }

    #[test]
    fn test_new_keeps_wire_value_verbatim() {
        let id = DeviceId::new("lower.case");
        assert_eq!(id.as_str(), "lower.case");
    }

    #[test]
    fn test_device_id_serializes_as_plain_string() {
        let json = serde_json::to_string(&DeviceId::new("ALPHA")).unwrap();
        assert_eq!(json, "\"ALPHA\"");
    }
}

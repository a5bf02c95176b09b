//! Address classification.
//!
//! Every textual host reference classifies to exactly one [`AddressType`].
//! Downstream code uses the type to decide whether a reference needs
//! resolution before it can be connected to.

use std::fmt;
use std::net::{IpAddr, Ipv6Addr};

use serde::{Deserialize, Serialize};

/// Domain terminator of multicast-DNS server names.
pub const LOCAL_DOMAIN: &str = ".local.";

/// Service type advertised by fleet devices.
pub const SERVICE_TYPE: &str = "_zmq._tcp.local.";

/// Semantic kind of a host reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AddressType {
    /// mDNS server name such as `device-4F2D7-2.local.`.
    ZeroconfServerName,
    /// Full mDNS service instance name ending in the fleet service type.
    ZeroconfServiceName,
    /// Anything that is neither symbolic nor an IP literal.
    HostName,
    /// IPv4 literal.
    IPv4,
    /// IPv6 literal, optionally with a `%scope` suffix.
    IPv6,
}

impl AddressType {
    /// Returns true for references that must be looked up on the network.
    #[must_use]
    pub fn is_symbolic(self) -> bool {
        matches!(self, Self::ZeroconfServerName | Self::ZeroconfServiceName)
    }

    /// Returns true for IP literals.
    #[must_use]
    pub fn is_ip(self) -> bool {
        matches!(self, Self::IPv4 | Self::IPv6)
    }
}

/// Classifies a host reference.
///
/// Precedence: service-name suffix, server-name suffix, IP literal,
/// hostname. Never fails.
#[must_use]
pub fn classify(s: &str) -> AddressType {
    if s.ends_with(SERVICE_TYPE) {
        return AddressType::ZeroconfServiceName;
    }
    if s.ends_with(LOCAL_DOMAIN) {
        return AddressType::ZeroconfServerName;
    }

    match s.parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => AddressType::IPv4,
        Ok(IpAddr::V6(_)) => AddressType::IPv6,
        Err(_) if is_scoped_ipv6(s) => AddressType::IPv6,
        Err(_) => AddressType::HostName,
    }
}

/// Link-local literals like `fe80::1%eth0`.
fn is_scoped_ipv6(s: &str) -> bool {
    match s.split_once('%') {
        Some((ip, scope)) => !scope.is_empty() && ip.parse::<Ipv6Addr>().is_ok(),
        None => false,
    }
}

/// Immutable pair of a raw reference and its classification.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct Address {
    raw: String,
    kind: AddressType,
}

impl Address {
    /// Creates and classifies an address.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let kind = classify(&raw);
        Self { raw, kind }
    }

    /// Returns the reference exactly as given.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Returns the classified type.
    #[must_use]
    pub fn kind(&self) -> AddressType {
        self.kind
    }

    /// Returns true if the address can change between boots.
    #[must_use]
    pub fn is_dynamic(&self) -> bool {
        self.kind == AddressType::ZeroconfServerName
    }

    /// Parses the IP literal, ignoring any IPv6 scope suffix.
    #[must_use]
    pub fn ip(&self) -> Option<IpAddr> {
        match self.kind {
            AddressType::IPv4 | AddressType::IPv6 => {
                let bare = self.raw.split('%').next().unwrap_or(&self.raw);
                bare.parse().ok()
            }
            _ => None,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl From<String> for Address {
    fn from(raw: String) -> Self {
        Self::new(raw)
    }
}

impl From<&str> for Address {
    fn from(raw: &str) -> Self {
        Self::new(raw)
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Self::new(ip.to_string())
    }
}

impl From<Address> for String {
    fn from(addr: Address) -> Self {
        addr.raw
    }
}

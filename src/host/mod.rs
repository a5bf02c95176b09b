//! Host records and host reference resolution.
//!
//! A [`Host`] is either discovered over mDNS or given by the user. It
//! carries the reference as given, the concrete addresses it resolved
//! to, discovery properties, and, once negotiated, the SSH target and
//! the credential set that worked.

pub mod address;
pub mod resolver;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ssh::CredentialSet;

pub use address::{Address, AddressType, LOCAL_DOMAIN, SERVICE_TYPE, classify};
pub use resolver::{DeviceSource, HostResolver, ResolutionReport, symbolic_prefix};

/// Property key holding the mDNS service instance name.
pub const PROP_NAME: &str = "name";

/// Property key holding the advertised hardware id.
pub const PROP_HARDWARE_ID: &str = "hardware_id";

/// One device, discovered or user-specified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    /// Reference as given; may be symbolic.
    pub addr: Address,
    /// Concrete addresses usable for connecting, in preference order.
    #[serde(default)]
    pub resolved_addrs: Vec<Address>,
    /// Opaque discovery properties.
    #[serde(default)]
    pub props: BTreeMap<String, String>,
    /// Address that a session was negotiated against.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_host: Option<Address>,
    /// Credential set that authenticated against `ssh_host`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_params: Option<CredentialSet>,
}

impl Host {
    /// Creates an unresolved host from a reference.
    #[must_use]
    pub fn new(addr: impl Into<Address>) -> Self {
        Self {
            addr: addr.into(),
            resolved_addrs: Vec::new(),
            props: BTreeMap::new(),
            ssh_host: None,
            ssh_params: None,
        }
    }

    /// Sets the resolved addresses.
    #[must_use]
    pub fn with_resolved_addrs<I, A>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.resolved_addrs = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Sets a discovery property.
    #[must_use]
    pub fn with_prop(mut self, key: &str, value: impl Into<String>) -> Self {
        self.props.insert(key.to_string(), value.into());
        self
    }

    /// Returns the mDNS service instance name, if discovered.
    #[must_use]
    pub fn service_name(&self) -> Option<&str> {
        self.props.get(PROP_NAME).map(String::as_str)
    }

    /// Returns the advertised hardware id, if any.
    #[must_use]
    pub fn hardware_id(&self) -> Option<&str> {
        self.props.get(PROP_HARDWARE_ID).map(String::as_str)
    }

    /// Returns true once `resolved_addrs` is populated.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        !self.resolved_addrs.is_empty()
    }

    /// Moves IPv4 addresses ahead of IPv6 ones, otherwise keeping order.
    pub fn sort_resolved_addrs(&mut self) {
        self.resolved_addrs
            .sort_by_key(|a| u8::from(a.kind() == AddressType::IPv6));
    }

    /// Address used for the next connection: the negotiated one, else the
    /// first resolved one, else the reference itself.
    #[must_use]
    pub fn connect_addr(&self) -> &Address {
        self.ssh_host
            .as_ref()
            .or_else(|| self.resolved_addrs.first())
            .unwrap_or(&self.addr)
    }
}

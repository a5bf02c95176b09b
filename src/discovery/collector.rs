//! Single-writer device cache fed by discovery events.
//!
//! The collector is owned by the listener loop and mutated only through
//! [`DiscoveryCollector::apply`]; readers get an owned snapshot once the
//! browse is over.

use std::collections::HashMap;
use std::net::IpAddr;

use tracing::{debug, trace};

use crate::host::{Address, Host, PROP_HARDWARE_ID, PROP_NAME};

/// Prefix every fleet device advertises in its `urn` TXT property.
pub const URN_PREFIX: &str = "horus:";

/// A resolved service announcement, independent of the mDNS library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    /// Full service instance name.
    pub name: String,
    /// Server (host) name, e.g. `device-4F2D7-2.local.`.
    pub server: String,
    /// Addresses the server answered with.
    pub addresses: Vec<IpAddr>,
    /// Value of the `urn` TXT property.
    pub urn: Option<String>,
    /// Value of the `hardware_id` TXT property.
    pub hardware_id: Option<String>,
}

impl ServiceRecord {
    /// Returns true if the record belongs to the fleet.
    #[must_use]
    pub fn is_fleet_device(&self) -> bool {
        self.urn.as_deref().is_some_and(|u| u.starts_with(URN_PREFIX))
    }

    /// Deduplication key: hardware id, else the instance name.
    #[must_use]
    pub fn key(&self) -> &str {
        self.hardware_id.as_deref().unwrap_or(&self.name)
    }

    fn into_host(self) -> Host {
        let mut host = Host::new(self.server)
            .with_resolved_addrs(self.addresses.into_iter().map(Address::from))
            .with_prop(PROP_NAME, self.name);
        if let Some(hwid) = self.hardware_id {
            host = host.with_prop(PROP_HARDWARE_ID, hwid);
        }
        host.sort_resolved_addrs();
        host
    }
}

/// Events in the order the mDNS library delivered them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A service was added or its attributes changed.
    Resolved(ServiceRecord),
    /// A service instance went away.
    Removed {
        /// Full service instance name.
        name: String,
    },
}

/// Deduplicated view of the devices seen so far.
#[derive(Debug, Default)]
pub struct DiscoveryCollector {
    hosts: HashMap<String, Host>,
    keys_by_name: HashMap<String, String>,
}

impl DiscoveryCollector {
    /// Creates an empty collector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event.
    pub fn apply(&mut self, event: DiscoveryEvent) {
        match event {
            DiscoveryEvent::Resolved(record) => self.upsert(record),
            DiscoveryEvent::Removed { name } => self.remove(&name),
        }
    }

    fn upsert(&mut self, record: ServiceRecord) {
        if !record.is_fleet_device() {
            trace!("Ignoring {}: not a fleet device", record.name);
            return;
        }

        let key = record.key().to_string();
        let name = record.name.clone();

        // The same instance may now report a hardware id it lacked before.
        if let Some(old_key) = self.keys_by_name.insert(name.clone(), key.clone()) {
            if old_key != key && self.owned_by(&old_key, &name) {
                self.hosts.remove(&old_key);
            }
        }

        let host = record.into_host();
        match self.hosts.insert(key.clone(), host) {
            Some(previous) => debug!(
                "Updated {} (was {})",
                key,
                previous.service_name().unwrap_or("?")
            ),
            None => debug!("Added {}", key),
        }
    }

    fn remove(&mut self, name: &str) {
        let Some(key) = self.keys_by_name.remove(name) else {
            return;
        };

        // A device re-announced under a new name stays.
        if self.owned_by(&key, name) {
            self.hosts.remove(&key);
            debug!("Removed {}", key);
        }
    }

    fn owned_by(&self, key: &str, name: &str) -> bool {
        self.hosts
            .get(key)
            .is_some_and(|h| h.service_name() == Some(name))
    }

    /// Number of devices currently known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    /// Returns true if no device is known.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    /// Consumes the collector, returning devices sorted by server name
    /// and then by service name.
    #[must_use]
    pub fn into_hosts(self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.hosts.into_values().collect();
        hosts.sort_by(|a, b| {
            a.addr
                .as_str()
                .cmp(b.addr.as_str())
                .then_with(|| a.service_name().cmp(&b.service_name()))
        });
        hosts
    }
}

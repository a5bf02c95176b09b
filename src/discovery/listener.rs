//! Bounded-time mDNS browse.

use std::time::{Duration, Instant};

use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tracing::{debug, info, warn};

use super::collector::{DiscoveryCollector, DiscoveryEvent, ServiceRecord};
use crate::error::{DeployError, Result};
use crate::host::{DeviceSource, Host, SERVICE_TYPE};

/// TXT property carrying the fleet URN.
const TXT_URN: &str = "urn";

/// TXT property carrying the hardware id.
const TXT_HARDWARE_ID: &str = "hardware_id";

/// Longest browse window honored when `wait` overflows the clock.
const MAX_BROWSE_WAIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Discovers fleet devices with an mDNS browse.
#[derive(Debug, Clone)]
pub struct MdnsDiscovery {
    service_type: String,
}

impl MdnsDiscovery {
    /// Browses for the fleet service type.
    #[must_use]
    pub fn new() -> Self {
        Self {
            service_type: SERVICE_TYPE.to_string(),
        }
    }

    /// Runs the browse for `wait` and returns the deduplicated devices.
    ///
    /// Blocks for the whole window. An empty result is not an error here.
    pub fn browse(&self, wait: Duration) -> Result<Vec<Host>> {
        let daemon = ServiceDaemon::new().map_err(|e| DeployError::Discovery(e.to_string()))?;
        let receiver = daemon
            .browse(&self.service_type)
            .map_err(|e| DeployError::Discovery(e.to_string()))?;

        debug!("Browsing {} for {:?}", self.service_type, wait);

        let deadline = browse_deadline(Instant::now(), wait);
        let mut collector = DiscoveryCollector::new();
        let mut daemon_gone = false;

        loop {
            match receiver.recv_deadline(deadline) {
                Ok(event) => {
                    if let Some(event) = translate(event) {
                        collector.apply(event);
                    }
                }
                Err(_) => {
                    daemon_gone = Instant::now() < deadline;
                    break;
                }
            }
        }

        if let Err(e) = daemon.stop_browse(&self.service_type) {
            debug!("stop_browse failed: {}", e);
        }
        if let Err(e) = daemon.shutdown() {
            debug!("mDNS daemon shutdown failed: {}", e);
        }

        if daemon_gone {
            return Err(DeployError::Discovery(
                "mDNS daemon stopped during browse".to_string(),
            ));
        }

        let hosts = collector.into_hosts();
        info!("Discovered {} device(s)", hosts.len());
        Ok(hosts)
    }
}

impl Default for MdnsDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceSource for MdnsDiscovery {
    fn discover(&self, wait: Duration) -> Result<Vec<Host>> {
        self.browse(wait)
    }
}

/// Runs a fleet browse for `wait`.
pub fn discover_devices(wait: Duration) -> Result<Vec<Host>> {
    MdnsDiscovery::new().browse(wait)
}

fn browse_deadline(now: Instant, wait: Duration) -> Instant {
    now.checked_add(wait).unwrap_or(now + MAX_BROWSE_WAIT)
}

fn translate(event: ServiceEvent) -> Option<DiscoveryEvent> {
    match event {
        ServiceEvent::ServiceResolved(info) => Some(DiscoveryEvent::Resolved(record_from(&info))),
        ServiceEvent::ServiceRemoved(_, fullname) => {
            Some(DiscoveryEvent::Removed { name: fullname })
        }
        ServiceEvent::SearchStopped(ty) => {
            warn!("Browse for {} stopped early", ty);
            None
        }
        _ => None,
    }
}

fn record_from(info: &ServiceInfo) -> ServiceRecord {
    ServiceRecord {
        name: info.get_fullname().to_string(),
        server: info.get_hostname().to_string(),
        addresses: info.get_addresses().iter().copied().collect(),
        urn: info.get_property_val_str(TXT_URN).map(str::to_string),
        hardware_id: info.get_property_val_str(TXT_HARDWARE_ID).map(str::to_string),
    }
}

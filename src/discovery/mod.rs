//! mDNS device discovery.
//!
//! [`MdnsDiscovery`] browses for a fixed window and funnels every
//! library event into one [`DiscoveryCollector`]. The collector is only
//! read after the browse is closed.

pub mod collector;
pub mod listener;

pub use collector::{DiscoveryCollector, DiscoveryEvent, ServiceRecord, URN_PREFIX};
pub use listener::{MdnsDiscovery, discover_devices};

//! horus-deploy
//!
//! Finds Horus devices on the local network and prepares SSH access to
//! them for the deployment runner.
//!
//! # Architecture
//!
//! - **Discovery**: bounded-time mDNS browse, deduplicated by hardware id
//! - **Host**: address classification and symbolic reference resolution
//! - **SSH**: key material, credential chain and credential negotiation
//! - **Reconnect**: surviving a reboot that may change the device address
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use horus_deploy::discovery::MdnsDiscovery;
//! use horus_deploy::host::{Host, HostResolver};
//!
//! let resolver = HostResolver::new(MdnsDiscovery::new()).with_wait(Duration::from_secs(2));
//! let host = resolver.resolve(&Host::new("device-4F2D7-2.local."))?;
//! # Ok::<(), horus_deploy::DeployError>(())
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod discovery;
pub mod error;
pub mod host;
pub mod logging;
pub mod reconnect;
pub mod ssh;

// Re-export main types
pub use config::Settings;
pub use discovery::MdnsDiscovery;
pub use error::{ConnectError, DeployError, Result};
pub use host::{Address, AddressType, Host, HostResolver, classify};
pub use reconnect::{ReconnectPolicy, ReconnectSupervisor};
pub use ssh::{CredentialChain, CredentialNegotiator, CredentialSet, KeyMaterial};

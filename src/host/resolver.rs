//! Host reference resolution.
//!
//! Non-symbolic references resolve to themselves. Server-name references
//! (`<name>[-<digits>].local.`) are matched by prefix against a fresh
//! discovery run; the first discovered host whose server name starts
//! with the bare prefix wins.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{AddressType, Host, LOCAL_DOMAIN};
use crate::error::{DeployError, Result};

/// Default discovery wait used when resolving.
pub const DEFAULT_RESOLVE_WAIT: Duration = Duration::from_secs(2);

/// Server name: a name, an optional numeric suffix, the local domain.
static SERVER_NAME_RE: OnceLock<Regex> = OnceLock::new();

#[allow(clippy::expect_used)]
fn server_name_re() -> &'static Regex {
    SERVER_NAME_RE
        .get_or_init(|| Regex::new(r"^(.+?)(?:-\d+)?\.local\.").expect("valid server name pattern"))
}

/// Extracts the bare prefix of a server name reference.
///
/// `device-4F2D7-2.local.` yields `device-4F2D7`.
pub fn symbolic_prefix(raw: &str) -> Result<&str> {
    server_name_re()
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
        .ok_or_else(|| DeployError::MalformedSymbolicAddress(raw.to_string()))
}

/// Something that can list the devices currently on the network.
pub trait DeviceSource {
    /// Blocks for `wait` and returns the devices seen.
    fn discover(&self, wait: Duration) -> Result<Vec<Host>>;
}

impl<F> DeviceSource for F
where
    F: Fn(Duration) -> Result<Vec<Host>>,
{
    fn discover(&self, wait: Duration) -> Result<Vec<Host>> {
        self(wait)
    }
}

/// Resolves possibly-symbolic host references.
#[derive(Debug, Clone)]
pub struct HostResolver<D> {
    source: D,
    wait: Duration,
}

impl<D: DeviceSource> HostResolver<D> {
    /// Creates a resolver using the default wait window.
    #[must_use]
    pub fn new(source: D) -> Self {
        Self {
            source,
            wait: DEFAULT_RESOLVE_WAIT,
        }
    }

    /// Overrides the discovery wait window.
    #[must_use]
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Resolves `host`.
    ///
    /// Returns `Ok(None)` when a well-formed server name matched nothing.
    /// Fields of `host` other than `resolved_addrs` are preserved.
    pub fn resolve(&self, host: &Host) -> Result<Option<Host>> {
        match host.addr.kind() {
            AddressType::ZeroconfServiceName => Err(DeployError::UnimplementedResolutionKind(
                host.addr.to_string(),
            )),
            AddressType::ZeroconfServerName => self.resolve_server_name(host),
            _ => {
                let mut resolved = host.clone();
                resolved.resolved_addrs = vec![host.addr.clone()];
                Ok(Some(resolved))
            }
        }
    }

    /// Like [`resolve`](Self::resolve) but treats "no match" as an error.
    pub fn resolve_required(&self, host: &Host) -> Result<Host> {
        self.resolve(host)?
            .ok_or_else(|| DeployError::ResolutionNotFound(host.addr.to_string()))
    }

    fn resolve_server_name(&self, host: &Host) -> Result<Option<Host>> {
        let prefix = symbolic_prefix(host.addr.as_str())?;
        debug!("Resolving {} using prefix {:?}", host.addr, prefix);

        let discovered = self.source.discover(self.wait)?;
        let matched = discovered.iter().find(|d| {
            let raw = d.addr.as_str();
            raw.starts_with(prefix) && raw.ends_with(LOCAL_DOMAIN)
        });

        let Some(matched) = matched else {
            info!(
                "No device matching {} among {} discovered",
                host.addr,
                discovered.len()
            );
            return Ok(None);
        };

        info!(
            "Resolved {} via {} to [{}]",
            host.addr,
            matched.addr,
            join_addrs(matched)
        );

        let mut resolved = host.clone();
        resolved.resolved_addrs = matched.resolved_addrs.clone();
        Ok(Some(resolved))
    }
}

fn join_addrs(host: &Host) -> String {
    host.resolved_addrs
        .iter()
        .map(|a| a.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

/// JSON document printed by the `resolve` subcommand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ResolutionReport {
    /// Resolved addresses, in preference order.
    Results {
        /// Address strings.
        results: Vec<String>,
    },
    /// The reference could not be resolved.
    Warning {
        /// Human-readable messages.
        warning: Vec<String>,
    },
}

impl ResolutionReport {
    /// Builds the report for a resolution outcome.
    #[must_use]
    pub fn from_outcome(reference: &str, outcome: Option<&Host>) -> Self {
        match outcome {
            Some(host) => Self::Results {
                results: host
                    .resolved_addrs
                    .iter()
                    .map(|a| a.as_str().to_string())
                    .collect(),
            },
            None => Self::Warning {
                warning: vec![format!("could not resolve {reference}")],
            },
        }
    }
}

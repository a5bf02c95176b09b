//! Re-resolution strategies for the reconnect loop.
//!
//! [`SubprocessResolver`] runs the `resolve` subcommand of this binary in
//! a child process so mDNS traffic stays out of the supervising process.
//! [`InProcessResolver`] calls a [`HostResolver`] on the blocking pool.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use super::AddressResolver;
use crate::error::{DeployError, Result};
use crate::host::{Address, DeviceSource, Host, HostResolver, ResolutionReport};

/// Default bound on one resolver process run.
pub const DEFAULT_RESOLVER_TIMEOUT: Duration = Duration::from_secs(10);

/// Resolves through a child process that prints a [`ResolutionReport`].
#[derive(Debug, Clone)]
pub struct SubprocessResolver {
    program: PathBuf,
    args: Vec<OsString>,
    timeout: Duration,
}

impl SubprocessResolver {
    /// Runs `program args... <reference>`.
    pub fn new<I, S>(program: impl Into<PathBuf>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_RESOLVER_TIMEOUT,
        }
    }

    /// Runs `<this executable> resolve <reference>`, passing the discovery
    /// window along.
    pub fn current_exe(discovery_timeout: Duration) -> Result<Self> {
        let exe = std::env::current_exe()?;
        Ok(Self::new(
            exe,
            [
                OsString::from("--discovery-timeout"),
                OsString::from(discovery_timeout.as_secs_f64().to_string()),
                OsString::from("resolve"),
            ],
        ))
    }

    /// Overrides the per-run bound.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AddressResolver for SubprocessResolver {
    async fn resolve_addresses(&self, reference: &Address) -> Result<Vec<Address>> {
        let child = Command::new(&self.program)
            .args(&self.args)
            .arg(reference.as_str())
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| {
                DeployError::ResolverProcess(format!(
                    "no answer for {} within {:?}",
                    reference, self.timeout
                ))
            })??;

        if !output.status.success() {
            return Err(DeployError::ResolverProcess(format!(
                "{} ({})",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let report: ResolutionReport = serde_json::from_slice(&output.stdout)
            .map_err(|e| DeployError::ResolverProcess(format!("unreadable report: {}", e)))?;

        match report {
            ResolutionReport::Results { results } => {
                Ok(results.into_iter().map(Address::new).collect())
            }
            ResolutionReport::Warning { warning } => {
                debug!("Resolver: {}", warning.join("; "));
                Ok(Vec::new())
            }
        }
    }
}

/// Resolves in this process on the blocking thread pool.
pub struct InProcessResolver<D> {
    resolver: Arc<HostResolver<D>>,
}

impl<D> InProcessResolver<D> {
    /// Wraps a host resolver.
    pub fn new(resolver: HostResolver<D>) -> Self {
        Self {
            resolver: Arc::new(resolver),
        }
    }
}

#[async_trait]
impl<D> AddressResolver for InProcessResolver<D>
where
    D: DeviceSource + Send + Sync + 'static,
{
    async fn resolve_addresses(&self, reference: &Address) -> Result<Vec<Address>> {
        let resolver = Arc::clone(&self.resolver);
        let host = Host::new(reference.clone());

        let outcome = tokio::task::spawn_blocking(move || resolver.resolve(&host))
            .await
            .map_err(|e| DeployError::ResolverProcess(e.to_string()))??;

        Ok(outcome.map(|h| h.resolved_addrs).unwrap_or_default())
    }
}

//! Reconnecting to a host after a disruptive remote operation.
//!
//! The supervisor fires the disruptive command, waits for the device to
//! go down, then polls until a lightweight probe with the previously
//! negotiated credentials succeeds. Dynamic (mDNS server name) hosts are
//! re-resolved on every attempt because a rebooted device may come back
//! on a different address.

pub mod resolver;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};
use crate::host::{Address, Host};
use crate::ssh::{
    CommandOutcome, CredentialSet, DEFAULT_CONNECT_TIMEOUT, DISCONNECT_EXIT_CODE, Transport,
};

pub use resolver::{InProcessResolver, SubprocessResolver};

/// Command used to reboot a device.
pub const REBOOT_COMMAND: &str = "reboot";

/// Timing of the reconnect loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Wait before the first attempt.
    pub delay: Duration,
    /// Wait between attempts.
    pub interval: Duration,
    /// Overall budget the attempt count is derived from.
    pub timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_secs(10),
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(300),
        }
    }
}

impl ReconnectPolicy {
    /// Number of attempts: `timeout / interval`, rounded.
    #[must_use]
    pub fn max_attempts(&self) -> u64 {
        if self.interval.is_zero() {
            return 1;
        }
        (self.timeout.as_secs_f64() / self.interval.as_secs_f64()).round() as u64
    }
}

/// Turns a dynamic reference into its current addresses.
#[async_trait]
pub trait AddressResolver: Send + Sync {
    /// Returns the current addresses of `reference`; empty when the
    /// device is not visible right now.
    async fn resolve_addresses(&self, reference: &Address) -> Result<Vec<Address>>;
}

/// Drives a disruptive operation and the reconnect loop after it.
pub struct ReconnectSupervisor<T, R> {
    transport: Arc<T>,
    resolver: R,
    policy: ReconnectPolicy,
    attempt_timeout: Duration,
}

impl<T, R> ReconnectSupervisor<T, R>
where
    T: Transport + 'static,
    R: AddressResolver,
{
    /// Creates a supervisor.
    pub fn new(transport: Arc<T>, resolver: R, policy: ReconnectPolicy) -> Self {
        Self {
            transport,
            resolver,
            policy,
            attempt_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Bounds each probe and each re-resolution.
    #[must_use]
    pub fn with_attempt_timeout(mut self, attempt_timeout: Duration) -> Self {
        self.attempt_timeout = attempt_timeout;
        self
    }

    /// Runs `command` on a negotiated host and waits for it to come back.
    ///
    /// Both a clean exit and a dropped session count as success of the
    /// command itself.
    pub async fn reconnect_after_disruptive_op(&self, host: &Host, command: &str) -> Result<Host> {
        let creds = negotiated_credentials(host)?;

        self.run_disruptive(host, &creds, command).await?;

        debug!("Waiting {:?} for {} to go down", self.policy.delay, host.addr);
        tokio::time::sleep(self.policy.delay).await;

        self.wait_until_reachable(host, &creds).await
    }

    /// Polls until a probe against `host` succeeds or attempts run out.
    ///
    /// Every attempt runs, however long the probes take; each probe and
    /// re-resolution is bounded by the attempt timeout.
    pub async fn wait_until_reachable(&self, host: &Host, creds: &CredentialSet) -> Result<Host> {
        let max_attempts = self.policy.max_attempts();

        for attempt in 1..=max_attempts {
            let candidates = self.candidates(host).await;

            for addr in &candidates {
                if self.probe(addr, creds).await {
                    info!("{} is back on {} after {} attempt(s)", host.addr, addr, attempt);
                    let mut back = host.clone();
                    if host.addr.is_dynamic() {
                        back.resolved_addrs = candidates.clone();
                    }
                    back.ssh_host = Some(addr.clone());
                    return Ok(back);
                }
            }

            debug!("Attempt {}/{} for {} failed", attempt, max_attempts, host.addr);
            if attempt < max_attempts {
                tokio::time::sleep(self.policy.interval).await;
            }
        }

        Err(DeployError::ReconnectTimedOut {
            host: host.addr.to_string(),
            attempts: max_attempts,
        })
    }

    async fn run_disruptive(
        &self,
        host: &Host,
        creds: &CredentialSet,
        command: &str,
    ) -> Result<()> {
        let addr = host.connect_addr().clone();
        info!("Running `{}` on {}", command, addr);

        let transport = Arc::clone(&self.transport);
        let task_addr = addr.clone();
        let task_creds = creds.clone();
        let task_command = command.to_string();
        let task = tokio::task::spawn_blocking(move || {
            transport.run_command(&task_addr, &task_creds, &task_command)
        });

        let outcome = match tokio::time::timeout(self.attempt_timeout, task).await {
            Ok(Ok(result)) => result.map_err(|source| DeployError::Network {
                address: addr.to_string(),
                source,
            })?,
            Ok(Err(join_err)) => {
                warn!("`{}` task on {} failed: {}", command, addr, join_err);
                CommandOutcome::Disconnected
            }
            // A reboot can leave the session hanging until it drops.
            Err(_) => CommandOutcome::Disconnected,
        };

        match outcome {
            CommandOutcome::Exited(0) | CommandOutcome::Disconnected => Ok(()),
            CommandOutcome::Exited(DISCONNECT_EXIT_CODE) => Ok(()),
            CommandOutcome::Exited(code) => Err(DeployError::DisruptiveOpFailed {
                command: command.to_string(),
                code,
            }),
        }
    }

    /// Addresses to try on this attempt.
    async fn candidates(&self, host: &Host) -> Vec<Address> {
        if !host.addr.is_dynamic() {
            return vec![host.connect_addr().clone()];
        }

        let lookup = self.resolver.resolve_addresses(&host.addr);
        match tokio::time::timeout(self.attempt_timeout, lookup).await {
            Ok(Ok(addrs)) => addrs,
            Ok(Err(e)) => {
                warn!("Re-resolving {} failed: {}", host.addr, e);
                Vec::new()
            }
            Err(_) => {
                warn!("Re-resolving {} timed out", host.addr);
                Vec::new()
            }
        }
    }

    async fn probe(&self, addr: &Address, creds: &CredentialSet) -> bool {
        let transport = Arc::clone(&self.transport);
        let (addr, creds) = (addr.clone(), creds.clone());
        let target = addr.clone();
        let task = tokio::task::spawn_blocking(move || transport.probe(&addr, &creds));

        match tokio::time::timeout(self.attempt_timeout, task).await {
            Ok(Ok(Ok(()))) => true,
            Ok(Ok(Err(e))) => {
                debug!("Probe of {} failed: {}", target, e);
                false
            }
            Ok(Err(e)) => {
                warn!("Probe task for {} failed: {}", target, e);
                false
            }
            Err(_) => {
                debug!("Probe of {} timed out", target);
                false
            }
        }
    }
}

fn negotiated_credentials(host: &Host) -> Result<CredentialSet> {
    host.ssh_params.clone().ok_or_else(|| {
        DeployError::InvalidArguments(format!("{} has no negotiated SSH parameters", host.addr))
    })
}

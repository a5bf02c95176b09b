//! Credential negotiation.
//!
//! Walks a host's resolved addresses in stored order and, per address,
//! the candidate credential sets in priority order until one
//! authenticates. Rejected credentials and missing key files are
//! recovered here; anything below the authentication layer aborts the
//! address it happened on.

use tracing::{debug, info, warn};

use super::credentials::{CredentialChain, CredentialSet};
use super::transport::Transport;
use crate::error::{ConnectError, DeployError, Result};
use crate::host::{Address, Host};

/// Finds a working (address, credential set) pair for a host.
#[derive(Debug, Clone)]
pub struct CredentialNegotiator<T> {
    transport: T,
    chain: CredentialChain,
}

/// Outcome of trying every candidate against one address.
#[derive(Debug)]
enum AddressOutcome {
    Authenticated(CredentialSet),
    Rejected,
    Unreachable(ConnectError),
}

impl<T: Transport> CredentialNegotiator<T> {
    /// Creates a negotiator over a transport and a fallback chain.
    pub fn new(transport: T, chain: CredentialChain) -> Self {
        Self { transport, chain }
    }

    /// Returns the underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Negotiates credentials for a resolved host.
    ///
    /// On success the returned host carries `ssh_host` and `ssh_params`.
    /// Addresses are tried in the order they are stored; the negotiator
    /// never reorders them.
    pub fn negotiate(&self, host: &Host, user_supplied: Option<&CredentialSet>) -> Result<Host> {
        let addrs = self.target_addresses(host)?;
        let candidates = self.chain.candidates(user_supplied);

        let mut rejected_somewhere = false;
        let mut network_failure: Option<(Address, ConnectError)> = None;

        for addr in &addrs {
            match self.negotiate_address(addr, &candidates) {
                AddressOutcome::Authenticated(creds) => {
                    info!("Negotiated {} on {} ({})", host.addr, addr, creds.describe());
                    let mut negotiated = host.clone();
                    negotiated.ssh_host = Some(addr.clone());
                    negotiated.ssh_params = Some(creds);
                    return Ok(negotiated);
                }
                AddressOutcome::Rejected => rejected_somewhere = true,
                AddressOutcome::Unreachable(err) => {
                    warn!("Giving up on {} for {}: {}", addr, host.addr, err);
                    if network_failure.is_none() {
                        network_failure = Some((addr.clone(), err));
                    }
                }
            }
        }

        match network_failure {
            Some((address, source)) if !rejected_somewhere => Err(DeployError::Network {
                address: address.to_string(),
                source,
            }),
            _ => Err(DeployError::CredentialsExhausted(
                addrs.iter().map(|a| a.to_string()).collect(),
            )),
        }
    }

    /// Addresses to try: the resolved ones, or a non-symbolic reference
    /// itself.
    fn target_addresses(&self, host: &Host) -> Result<Vec<Address>> {
        if host.is_resolved() {
            return Ok(host.resolved_addrs.clone());
        }
        if host.addr.kind().is_symbolic() {
            return Err(DeployError::ResolutionNotFound(host.addr.to_string()));
        }
        Ok(vec![host.addr.clone()])
    }

    fn negotiate_address(&self, addr: &Address, candidates: &[CredentialSet]) -> AddressOutcome {
        let mut attempted = 0usize;

        for creds in candidates {
            if creds.key_missing() {
                debug!("Skipping {} on {}: key file missing", creds.describe(), addr);
                continue;
            }

            attempted += 1;
            match self.transport.authenticate(addr, creds) {
                Ok(()) => return AddressOutcome::Authenticated(creds.clone()),
                Err(ConnectError::Auth(reason)) => {
                    debug!("{} rejected on {}: {}", creds.describe(), addr, reason);
                }
                Err(err) => return AddressOutcome::Unreachable(err),
            }
        }

        debug!("{} candidate(s) rejected on {}", attempted, addr);
        AddressOutcome::Rejected
    }
}

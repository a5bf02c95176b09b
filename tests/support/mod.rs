//! Scripted collaborators shared by the integration tests.
//!
//! Nothing here touches the network: transports and resolvers answer
//! from closures and record what they were asked.

#![allow(dead_code, clippy::unwrap_used)]

use std::sync::Mutex;
use std::time::Duration;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use horus_deploy::error::{ConnectError, Result};
use horus_deploy::host::Address;
use horus_deploy::reconnect::AddressResolver;
use horus_deploy::ssh::{CommandOutcome, CredentialSet, Transport};

type AuthFn =
    dyn Fn(&Address, &CredentialSet) -> std::result::Result<(), ConnectError> + Send + Sync;

/// Transport whose authentication outcome is decided by a closure.
pub struct ScriptedTransport {
    auth: Box<AuthFn>,
    command_outcome: std::result::Result<CommandOutcome, ConnectError>,
    attempts: Mutex<Vec<(String, CredentialSet)>>,
    commands: Mutex<Vec<(String, String)>>,
    probes: AtomicUsize,
    reachability_delay: Duration,
}

impl ScriptedTransport {
    pub fn new<F>(auth: F) -> Self
    where
        F: Fn(&Address, &CredentialSet) -> std::result::Result<(), ConnectError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            auth: Box::new(auth),
            command_outcome: Ok(CommandOutcome::Exited(0)),
            attempts: Mutex::new(Vec::new()),
            commands: Mutex::new(Vec::new()),
            probes: AtomicUsize::new(0),
            reachability_delay: Duration::ZERO,
        }
    }

    /// Every address refuses connections.
    pub fn unreachable() -> Self {
        Self::new(|_, _| Err(ConnectError::Network("connection refused".into())))
    }

    /// What non-probe commands report.
    pub fn with_command_outcome(
        mut self,
        outcome: std::result::Result<CommandOutcome, ConnectError>,
    ) -> Self {
        self.command_outcome = outcome;
        self
    }

    /// Every probe blocks for `delay` before answering.
    pub fn with_reachability_delay(mut self, delay: Duration) -> Self {
        self.reachability_delay = delay;
        self
    }

    /// Authentication attempts as (address, credential set).
    pub fn attempts(&self) -> Vec<(String, CredentialSet)> {
        self.attempts.lock().unwrap().clone()
    }

    /// Addresses authentication was attempted against, in order.
    pub fn attempted_addresses(&self) -> Vec<String> {
        self.attempts().into_iter().map(|(a, _)| a).collect()
    }

    /// Non-probe commands as (address, command).
    pub fn commands(&self) -> Vec<(String, String)> {
        self.commands.lock().unwrap().clone()
    }

    pub fn probe_count(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }
}

impl Transport for ScriptedTransport {
    fn authenticate(
        &self,
        addr: &Address,
        creds: &CredentialSet,
    ) -> std::result::Result<(), ConnectError> {
        self.attempts
            .lock()
            .unwrap()
            .push((addr.to_string(), creds.clone()));
        (self.auth)(addr, creds)
    }

    fn run_command(
        &self,
        addr: &Address,
        creds: &CredentialSet,
        command: &str,
    ) -> std::result::Result<CommandOutcome, ConnectError> {
        if command == "true" {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if !self.reachability_delay.is_zero() {
                std::thread::sleep(self.reachability_delay);
            }
            return (self.auth)(addr, creds).map(|()| CommandOutcome::Exited(0));
        }
        self.commands
            .lock()
            .unwrap()
            .push((addr.to_string(), command.to_string()));
        self.command_outcome.clone()
    }
}

type ResolveFn = dyn Fn(usize) -> Result<Vec<Address>> + Send + Sync;

/// Resolver answering from a closure of the 1-based call number.
pub struct ScriptedResolver {
    answer: Box<ResolveFn>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new<F>(answer: F) -> Self
    where
        F: Fn(usize) -> Result<Vec<Address>> + Send + Sync + 'static,
    {
        Self {
            answer: Box::new(answer),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AddressResolver for ScriptedResolver {
    async fn resolve_addresses(&self, _reference: &Address) -> Result<Vec<Address>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (self.answer)(call)
    }
}

#[async_trait]
impl<'a> AddressResolver for &'a ScriptedResolver {
    async fn resolve_addresses(&self, reference: &Address) -> Result<Vec<Address>> {
        (**self).resolve_addresses(reference).await
    }
}

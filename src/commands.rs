//! Subcommand handlers.
//!
//! Machine-readable results go to stdout; prompts, tables shown during
//! interactive selection and progress notes go to stderr.

use std::io::{self, BufRead, Write};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::cli::{Cli, Command};
use crate::config::Settings;
use crate::discovery::{MdnsDiscovery, discover_devices};
use crate::error::{DeployError, Result};
use crate::host::{DeviceSource, Host, HostResolver, ResolutionReport};
use crate::reconnect::{
    REBOOT_COMMAND, ReconnectPolicy, ReconnectSupervisor, SubprocessResolver,
};
use crate::ssh::{
    CredentialChain, CredentialNegotiator, CredentialSet, KeyMaterial, Ssh2Transport, Transport,
};

/// Column headers of the device table.
const TABLE_HEADERS: [&str; 4] = ["Server", "Name", "IP addresses", "Hardware ID"];

/// Shared state of one invocation.
pub struct Context<'a> {
    settings: &'a Settings,
    config_dir: &'a Path,
    discovery_wait: Duration,
    user_set: Option<CredentialSet>,
}

impl<'a> Context<'a> {
    /// Validates the global flags and merges them with the settings.
    pub fn new(cli: &Cli, settings: &'a Settings, config_dir: &'a Path) -> Result<Self> {
        Ok(Self {
            settings,
            config_dir,
            discovery_wait: cli
                .discovery_wait()
                .unwrap_or_else(|| settings.discovery.wait()),
            user_set: cli.credential_set()?,
        })
    }

    fn negotiator(&self) -> Result<CredentialNegotiator<Ssh2Transport>> {
        let keys = KeyMaterial::init(self.config_dir)?;
        let chain = CredentialChain::builtin(&keys, self.settings.ssh.fallback_order)
            .with_port(self.settings.ssh.port);
        Ok(CredentialNegotiator::new(
            Ssh2Transport::new(self.settings.ssh.connect_timeout()),
            chain,
        ))
    }

    fn resolver(&self) -> HostResolver<MdnsDiscovery> {
        HostResolver::new(MdnsDiscovery::new()).with_wait(self.discovery_wait)
    }
}

/// Runs the selected subcommand.
pub fn run(cli: &Cli, settings: &Settings, config_dir: &Path) -> Result<()> {
    let ctx = Context::new(cli, settings, config_dir)?;
    let mut stdout = io::stdout().lock();

    match &cli.command {
        Command::Discover => discover(&ctx, &mut stdout),
        Command::Resolve { host } => resolve(&ctx.resolver(), host, &mut stdout),
        Command::Connect { hosts } => connect(&ctx, hosts, &mut stdout),
        Command::Reboot {
            host,
            delay,
            interval,
            timeout,
        } => {
            let policy = override_policy(settings.reconnect.policy(), *delay, *interval, *timeout);
            reboot(&ctx, host, policy, &mut stdout)
        }
        Command::Pubkey { default } => {
            let keys = KeyMaterial::init(config_dir)?;
            let key = if *default {
                keys.default_public_key()
            } else {
                keys.user_public_key()
            };
            writeln!(stdout, "{}", key)?;
            Ok(())
        }
    }
}

fn discover<W: Write>(ctx: &Context<'_>, out: &mut W) -> Result<()> {
    let devices = discover_devices(ctx.discovery_wait)?;
    if devices.is_empty() {
        return Err(DeployError::DiscoveryEmpty);
    }
    write!(out, "{}", format_device_table(&devices, false))?;
    Ok(())
}

/// Handles `resolve`: a report on stdout for found and not-found alike.
pub fn resolve<D: DeviceSource, W: Write>(
    resolver: &HostResolver<D>,
    reference: &str,
    out: &mut W,
) -> Result<()> {
    let outcome = match resolver.resolve(&Host::new(reference)) {
        Ok(outcome) => outcome,
        Err(e) if e.is_not_found() => None,
        Err(e) => return Err(e),
    };

    let report = ResolutionReport::from_outcome(reference, outcome.as_ref());
    serde_json::to_writer(&mut *out, &report)?;
    writeln!(out)?;
    Ok(())
}

fn connect<W: Write>(ctx: &Context<'_>, hosts: &[String], out: &mut W) -> Result<()> {
    let targets = if hosts.is_empty() {
        discover_and_select(ctx)?
    } else {
        let resolver = ctx.resolver();
        hosts
            .iter()
            .map(|h| resolve_target(&resolver, h))
            .collect::<Result<Vec<_>>>()?
    };

    let negotiator = ctx.negotiator()?;
    let negotiated = negotiate_all(&negotiator, &targets, ctx.user_set.as_ref())?;

    serde_json::to_writer_pretty(&mut *out, &negotiated)?;
    writeln!(out)?;
    Ok(())
}

fn reboot<W: Write>(
    ctx: &Context<'_>,
    host: &str,
    policy: ReconnectPolicy,
    out: &mut W,
) -> Result<()> {
    let target = resolve_target(&ctx.resolver(), host)?;
    let negotiator = ctx.negotiator()?;
    let negotiated = negotiator.negotiate(&target, ctx.user_set.as_ref())?;

    let supervisor = ReconnectSupervisor::new(
        Arc::new(negotiator.transport().clone()),
        SubprocessResolver::current_exe(ctx.discovery_wait)?,
        policy,
    )
    .with_attempt_timeout(ctx.settings.ssh.connect_timeout());

    info!(
        "Rebooting {}: delay {:?}, interval {:?}, {} attempt(s)",
        negotiated.addr,
        policy.delay,
        policy.interval,
        policy.max_attempts()
    );

    let runtime = tokio::runtime::Runtime::new()?;
    let back =
        runtime.block_on(supervisor.reconnect_after_disruptive_op(&negotiated, REBOOT_COMMAND))?;

    serde_json::to_writer_pretty(&mut *out, &back)?;
    writeln!(out)?;
    Ok(())
}

/// Resolves one user-given reference, ordering IPv4 first.
pub fn resolve_target<D: DeviceSource>(
    resolver: &HostResolver<D>,
    reference: &str,
) -> Result<Host> {
    let mut host = resolver.resolve_required(&Host::new(reference))?;
    host.sort_resolved_addrs();
    Ok(host)
}

/// Negotiates every host on its own thread.
///
/// Results keep the input order. The first failure is returned.
pub fn negotiate_all<T: Transport>(
    negotiator: &CredentialNegotiator<T>,
    hosts: &[Host],
    user_set: Option<&CredentialSet>,
) -> Result<Vec<Host>> {
    if hosts.len() < 2 {
        return hosts
            .iter()
            .map(|h| negotiator.negotiate(h, user_set))
            .collect();
    }

    std::thread::scope(|scope| {
        let handles: Vec<_> = hosts
            .iter()
            .map(|host| scope.spawn(move || negotiator.negotiate(host, user_set)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().unwrap_or_else(|_| {
                    Err(DeployError::InvalidArguments(
                        "negotiation thread panicked".to_string(),
                    ))
                })
            })
            .collect()
    })
}

fn discover_and_select(ctx: &Context<'_>) -> Result<Vec<Host>> {
    let mut stderr = io::stderr().lock();
    writeln!(stderr, "--> Scanning network for devices...")?;

    let devices = discover_devices(ctx.discovery_wait)?;
    if devices.is_empty() {
        return Err(DeployError::DiscoveryEmpty);
    }

    writeln!(stderr)?;
    write!(stderr, "{}", format_device_table(&devices, true))?;
    writeln!(stderr)?;

    let selected = select_devices(&devices, &mut io::stdin().lock(), &mut stderr)?;
    writeln!(stderr)?;
    Ok(selected)
}

/// Prompts until a valid selection is entered.
pub fn select_devices<R: BufRead, W: Write>(
    devices: &[Host],
    input: &mut R,
    prompt: &mut W,
) -> Result<Vec<Host>> {
    loop {
        write!(prompt, "    Select multiple devices (comma/space separated): ")?;
        prompt.flush()?;

        let mut line = String::new();
        if input.read_line(&mut line)? == 0 {
            return Err(DeployError::InvalidArguments(
                "no devices selected".to_string(),
            ));
        }

        match parse_choices(&line, devices.len()) {
            Some(choices) => {
                debug!("Selected {:?}", choices);
                return Ok(choices.into_iter().map(|i| devices[i - 1].clone()).collect());
            }
            None => writeln!(prompt, "Invalid choice. Try again.")?,
        }
    }
}

/// Parses a 1-based selection such as `1, 2 3`.
///
/// Returns `None` if the input is empty or any entry is out of range.
#[must_use]
pub fn parse_choices(input: &str, count: usize) -> Option<Vec<usize>> {
    let choices = input
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<usize>().ok().filter(|&n| (1..=count).contains(&n)))
        .collect::<Option<Vec<_>>>()?;

    (!choices.is_empty()).then_some(choices)
}

/// Renders devices as an aligned plain-text table.
#[must_use]
pub fn format_device_table(devices: &[Host], show_index: bool) -> String {
    let rows: Vec<Vec<String>> = devices
        .iter()
        .enumerate()
        .map(|(i, d)| {
            let mut row = Vec::with_capacity(5);
            if show_index {
                row.push((i + 1).to_string());
            }
            row.push(d.addr.to_string());
            row.push(d.service_name().unwrap_or("").to_string());
            row.push(
                d.resolved_addrs
                    .iter()
                    .map(|a| a.as_str())
                    .collect::<Vec<_>>()
                    .join(", "),
            );
            row.push(d.hardware_id().unwrap_or("N/A").to_string());
            row
        })
        .collect();

    let mut headers: Vec<&str> = Vec::with_capacity(5);
    if show_index {
        headers.push("");
    }
    headers.extend(TABLE_HEADERS);

    let widths: Vec<usize> = headers
        .iter()
        .enumerate()
        .map(|(col, h)| {
            rows.iter()
                .map(|r| r[col].chars().count())
                .chain(std::iter::once(h.chars().count()))
                .max()
                .unwrap_or(0)
        })
        .collect();

    let mut out = String::new();
    push_row(&mut out, headers.iter().copied(), &widths);
    let rule: Vec<String> = widths.iter().map(|w| "-".repeat(*w)).collect();
    push_row(&mut out, rule.iter().map(String::as_str), &widths);
    for row in &rows {
        push_row(&mut out, row.iter().map(String::as_str), &widths);
    }
    out
}

fn push_row<'a>(out: &mut String, cells: impl Iterator<Item = &'a str>, widths: &[usize]) {
    let line = cells
        .zip(widths)
        .map(|(cell, width)| format!("{:<width$}", cell, width = *width))
        .collect::<Vec<_>>()
        .join("  ");
    out.push_str(line.trim_end());
    out.push('\n');
}

fn override_policy(
    base: ReconnectPolicy,
    delay: Option<f64>,
    interval: Option<f64>,
    timeout: Option<f64>,
) -> ReconnectPolicy {
    let pick = |flag: Option<f64>, current: Duration| {
        flag.and_then(|s| Duration::try_from_secs_f64(s).ok())
            .unwrap_or(current)
    };
    ReconnectPolicy {
        delay: pick(delay, base.delay),
        interval: pick(interval, base.interval),
        timeout: pick(timeout, base.timeout),
    }
}

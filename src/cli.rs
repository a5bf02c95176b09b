//! Command-line interface definition.

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser, Subcommand};

use crate::error::{DeployError, Result};
use crate::ssh::CredentialSet;

#[derive(Parser, Debug, Clone)]
#[command(name = "horus-deploy")]
#[command(
    version,
    about = "Discover Horus devices on the local network and negotiate SSH access to them"
)]
pub struct Cli {
    /// Seconds to listen for mDNS announcements
    #[arg(long, global = true, value_name = "SECS")]
    pub discovery_timeout: Option<f64>,

    /// SSH user tried before the built-in fallbacks
    #[arg(long, global = true)]
    pub ssh_user: Option<String>,

    /// SSH password
    #[arg(long, global = true)]
    pub ssh_password: Option<String>,

    /// SSH port
    #[arg(long, global = true)]
    pub ssh_port: Option<u16>,

    /// Private key file
    #[arg(long, global = true, value_parser = existing_file)]
    pub ssh_key: Option<PathBuf>,

    /// Passphrase of the private key
    #[arg(long, global = true)]
    pub ssh_key_password: Option<String>,

    /// More output on stderr (-v, -vv, -vvv)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Discover devices on the local network
    Discover,

    /// Resolve a host reference and print the addresses as JSON
    Resolve {
        /// IP address, host name or `<name>.local.` server name
        #[arg(value_name = "HOST")]
        host: String,
    },

    /// Negotiate SSH parameters and print them as JSON
    Connect {
        /// Hosts to connect to; prompts for discovered devices when omitted
        #[arg(short = 'H', long = "host", value_name = "HOST")]
        hosts: Vec<String>,
    },

    /// Reboot a device and wait until it is reachable again
    Reboot {
        /// Host to reboot
        #[arg(short = 'H', long, value_name = "HOST")]
        host: String,

        /// Seconds to wait before the first reconnect attempt
        #[arg(long, value_name = "SECS")]
        delay: Option<f64>,

        /// Seconds between reconnect attempts
        #[arg(long, value_name = "SECS")]
        interval: Option<f64>,

        /// Seconds after which to give up
        #[arg(long, value_name = "SECS")]
        timeout: Option<f64>,
    },

    /// Print the public key to install on devices
    Pubkey {
        /// Print the bundled default key instead of the user key
        #[arg(long)]
        default: bool,
    },
}

impl Cli {
    /// Builds the user-supplied credential set from the `--ssh-*` flags.
    ///
    /// Returns `None` when no flag was given.
    pub fn credential_set(&self) -> Result<Option<CredentialSet>> {
        if self.ssh_key.is_some() && self.ssh_password.is_some() {
            return Err(DeployError::InvalidArguments(
                "--ssh-key cannot be used in combination with --ssh-password".to_string(),
            ));
        }
        if self.ssh_key_password.is_some() && self.ssh_key.is_none() {
            return Err(DeployError::InvalidArguments(
                "--ssh-key is required when using --ssh-key-password".to_string(),
            ));
        }

        let set = CredentialSet {
            user: self.ssh_user.clone(),
            key_path: self.ssh_key.clone(),
            key_passphrase: self.ssh_key_password.clone(),
            password: self.ssh_password.clone(),
            port: self.ssh_port,
        };

        Ok((!set.is_empty()).then_some(set))
    }

    /// Discovery window from the flag, if valid.
    #[must_use]
    pub fn discovery_wait(&self) -> Option<Duration> {
        self.discovery_timeout
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }
}

fn existing_file(value: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if !path.is_file() {
        return Err(format!("file {:?} does not exist", value));
    }
    std::fs::canonicalize(&path).map_err(|e| e.to_string())
}

//! horus-deploy - main entry point.
//!
//! Usage: horus-deploy [OPTIONS] <COMMAND>
//!
//! Commands:
//!   discover   List fleet devices on the local network
//!   resolve    Resolve a host reference to addresses (JSON)
//!   connect    Negotiate SSH parameters for one or more hosts (JSON)
//!   reboot     Reboot a device and wait for it to come back
//!   pubkey     Print the public key to install on devices

use std::fmt::Display;
use std::process;

use clap::Parser;

use horus_deploy::cli::Cli;
use horus_deploy::config::{self, Settings};
use horus_deploy::{commands, logging};

fn main() {
    let cli = Cli::parse();
    let config_dir = config::config_dir();

    let settings = match Settings::load(&config_dir) {
        Ok(settings) => settings,
        Err(e) => fatal(e),
    };

    if let Err(e) = logging::init(&settings.log, &config_dir, cli.verbose) {
        eprintln!("--> Warning: file logging disabled: {}", e);
    }

    if let Err(e) = commands::run(&cli, &settings, &config_dir) {
        tracing::debug!("Fatal: {:?}", e);
        fatal(e);
    }
}

/// Prints the error line and exits with status 1.
fn fatal(err: impl Display) -> ! {
    eprintln!("--> Error: {}", err);
    process::exit(1);
}

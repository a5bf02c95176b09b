//! Error types for discovery, resolution, negotiation and reconnects.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, DeployError>;

/// Errors surfaced to callers of the library and to the CLI.
#[derive(Debug, Error)]
pub enum DeployError {
    /// No device advertised the fleet service within the wait window.
    #[error("no devices found")]
    DiscoveryEmpty,

    /// A `.local.` reference did not match the server name pattern.
    #[error("zeroconf server name is malformed: {0:?}")]
    MalformedSymbolicAddress(String),

    /// A well-formed symbolic reference matched no live device.
    #[error("cannot resolve host: {0}")]
    ResolutionNotFound(String),

    /// No (address, credential set) pair authenticated.
    #[error("cannot find SSH parameters for: {}", .0.join(", "))]
    CredentialsExhausted(Vec<String>),

    /// The host did not come back after a disruptive operation.
    #[error("{host} did not come back after {attempts} reconnect attempts")]
    ReconnectTimedOut {
        /// Reference of the host that was being waited for.
        host: String,
        /// Number of attempts that were made.
        attempts: u64,
    },

    /// Service-name references are recognised but cannot be resolved yet.
    #[error("resolving zeroconf service names is not implemented: {0}")]
    UnimplementedResolutionKind(String),

    /// A transport attempt failed below the authentication layer.
    #[error("network failure on {address}: {source}")]
    Network {
        /// Address the attempt was made against.
        address: String,
        /// Underlying transport failure.
        #[source]
        source: ConnectError,
    },

    /// The disruptive command finished with an unexpected exit status.
    #[error("command `{command}` exited with status {code}")]
    DisruptiveOpFailed {
        /// Command that was run.
        command: String,
        /// Exit status reported by the remote side.
        code: i32,
    },

    /// The mDNS daemon could not be started or browsed.
    #[error("mDNS discovery failed: {0}")]
    Discovery(String),

    /// Key generation, encoding or installation failed.
    #[error("key material error: {0}")]
    Key(String),

    /// The out-of-process resolver failed or produced garbage.
    #[error("resolver process failed: {0}")]
    ResolverProcess(String),

    /// Conflicting or incomplete command-line options.
    #[error("{0}")]
    InvalidArguments(String),

    /// File I/O error.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Settings file could not be parsed.
    #[error("settings parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DeployError {
    /// Returns true for the "nothing matched" outcomes that scripted
    /// resolution reports as a warning rather than a failure.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::DiscoveryEmpty | Self::ResolutionNotFound(_))
    }
}

/// Failure of a single connect-and-authenticate attempt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The server rejected the offered credentials.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Unreachable, refused, timed out or dropped.
    #[error("{0}")]
    Network(String),
}

impl ConnectError {
    /// Returns true if the credentials were rejected.
    #[must_use]
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }
}

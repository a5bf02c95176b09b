//! SSH access to devices.
//!
//! - [`keys`]: the bundled default key pair and the generated user pair
//! - [`credentials`]: credential sets and the fallback chain
//! - [`transport`]: single connect/authenticate/run attempts
//! - [`negotiator`]: finding a working (address, credential set) pair

pub mod credentials;
pub mod keys;
pub mod negotiator;
pub mod transport;

pub use credentials::{
    CredentialChain, CredentialSet, DEFAULT_SSH_PORT, FALLBACK_USER, FallbackOrder,
};
pub use keys::{KeyMaterial, generate_key_pair};
pub use negotiator::CredentialNegotiator;
pub use transport::{
    CommandOutcome, DEFAULT_CONNECT_TIMEOUT, DISCONNECT_EXIT_CODE, Ssh2Transport, Transport,
};

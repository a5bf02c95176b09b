//! Credential sets and the built-in fallback chain.
//!
//! A [`CredentialSet`] is tried as a whole; sets are never merged field by
//! field. The user-supplied set, when present, is tried before the
//! built-in chain.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::keys::KeyMaterial;

/// Privileged user the fallback chain logs in as.
pub const FALLBACK_USER: &str = "root";

/// Port used when a set does not name one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// One self-consistent bundle of authentication parameters.
///
/// Field names follow the inventory keys the deployment runner reads.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CredentialSet {
    /// Login user.
    #[serde(rename = "ssh_user", default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Private key file.
    #[serde(rename = "ssh_key", default, skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// Passphrase of the private key.
    #[serde(
        rename = "ssh_key_password",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub key_passphrase: Option<String>,
    /// Password.
    #[serde(rename = "ssh_password", default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// SSH port.
    #[serde(rename = "ssh_port", default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl CredentialSet {
    /// Creates a set with only a user name.
    #[must_use]
    pub fn user(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Self::default()
        }
    }

    /// Creates a set with only a key file.
    #[must_use]
    pub fn key(path: impl Into<PathBuf>) -> Self {
        Self {
            key_path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Sets the key file.
    #[must_use]
    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.key_path = Some(path.into());
        self
    }

    /// Sets the password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Returns true if no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Returns the port to connect to.
    #[must_use]
    pub fn port_or_default(&self) -> u16 {
        self.port.unwrap_or(DEFAULT_SSH_PORT)
    }

    /// Returns true if the set names a key file that does not exist.
    #[must_use]
    pub fn key_missing(&self) -> bool {
        self.key_path.as_deref().is_some_and(|p| !p.exists())
    }

    /// Short description for logs. Never includes secrets.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut parts = Vec::with_capacity(4);
        parts.push(format!("user={}", self.user.as_deref().unwrap_or("<local>")));
        if let Some(ref key) = self.key_path {
            parts.push(format!("key={}", key.display()));
        }
        if self.password.is_some() {
            parts.push("password=***".to_string());
        }
        if let Some(port) = self.port {
            parts.push(format!("port={}", port));
        }
        parts.join(" ")
    }
}

/// Relative priority of the plain and keyed fallback candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackOrder {
    /// `root`, then `root` + user key, then `root` + default key.
    #[default]
    PlainFirst,
    /// `root` + user key, then `root` + default key, then `root`.
    KeyedFirst,
}

/// Ordered list of built-in candidate sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialChain {
    candidates: Vec<CredentialSet>,
}

impl CredentialChain {
    /// Builds the built-in fallback chain for the given key material.
    #[must_use]
    pub fn builtin(keys: &KeyMaterial, order: FallbackOrder) -> Self {
        let plain = CredentialSet::user(FALLBACK_USER);
        let user_key = CredentialSet::user(FALLBACK_USER).with_key(keys.user_private_path());
        let default_key =
            CredentialSet::user(FALLBACK_USER).with_key(keys.default_private_path());

        let candidates = match order {
            FallbackOrder::PlainFirst => vec![plain, user_key, default_key],
            FallbackOrder::KeyedFirst => vec![user_key, default_key, plain],
        };

        Self { candidates }
    }

    /// Uses an explicit list of candidates.
    #[must_use]
    pub fn from_candidates(candidates: Vec<CredentialSet>) -> Self {
        Self { candidates }
    }

    /// Applies `port` to every built-in candidate that names none.
    #[must_use]
    pub fn with_port(mut self, port: Option<u16>) -> Self {
        if let Some(port) = port {
            for set in self.candidates.iter_mut().filter(|s| s.port.is_none()) {
                set.port = Some(port);
            }
        }
        self
    }

    /// Returns the candidates to try, with the user-supplied set first.
    #[must_use]
    pub fn candidates(&self, user_supplied: Option<&CredentialSet>) -> Vec<CredentialSet> {
        let mut out = Vec::with_capacity(self.candidates.len() + 1);
        if let Some(set) = user_supplied.filter(|s| !s.is_empty()) {
            out.push(set.clone());
        }
        out.extend(self.candidates.iter().cloned());
        out
    }
}

//! Configuration for horus-deploy.
//!
//! Everything lives in one per-user directory: the key pairs, the log
//! directory and an optional `settings.toml`. Command-line flags
//! override the file.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::logging::LogConfig;
use crate::reconnect::ReconnectPolicy;
use crate::ssh::FallbackOrder;

/// Environment variable overriding the config directory.
pub const CONFIG_DIR_ENV: &str = "HORUS_DEPLOY_CONFIG_DIR";

/// Settings file name inside the config directory.
pub const SETTINGS_FILE: &str = "settings.toml";

/// Default discovery window in seconds.
pub const DEFAULT_DISCOVERY_TIMEOUT_SECS: f64 = 2.0;

/// Default bound on one SSH connect attempt in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;

const DEFAULT_SETTINGS: &str = r#"# horus-deploy settings
# =====================
# Every key is optional. Command-line flags take precedence.

[discovery]
# Seconds to listen for mDNS announcements.
# timeout_secs = 2.0

[ssh]
# Order of the built-in fallback credentials: "plain-first" tries root
# without a key before the keyed sets, "keyed-first" the other way round.
# fallback_order = "plain-first"
# connect_timeout_secs = 10
# port = 22

[reconnect]
# Used after a reboot: wait, then probe every interval until timeout.
# delay_secs = 10
# interval_secs = 1.0
# timeout_secs = 300

[log]
# Logs are written to the logs/ directory next to this file.
# enabled = true
# level = "info"            # trace, debug, info, warn, error, off
# retention_hours = 24
"#;

/// Returns the configuration directory.
#[must_use]
pub fn config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(CONFIG_DIR_ENV).filter(|d| !d.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("horus")
        .join("horus_deploy")
}

/// `[discovery]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoverySettings {
    /// Seconds to listen for announcements.
    pub timeout_secs: f64,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_DISCOVERY_TIMEOUT_SECS,
        }
    }
}

impl DiscoverySettings {
    /// Discovery window.
    #[must_use]
    pub fn wait(&self) -> Duration {
        secs_or(self.timeout_secs, DEFAULT_DISCOVERY_TIMEOUT_SECS)
    }
}

/// `[ssh]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SshSettings {
    /// Order of the built-in fallback candidates.
    pub fallback_order: FallbackOrder,
    /// Bound on one connect/authenticate attempt.
    pub connect_timeout_secs: u64,
    /// Port used when no flag names one.
    pub port: Option<u16>,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            fallback_order: FallbackOrder::default(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            port: None,
        }
    }
}

impl SshSettings {
    /// Per-attempt bound.
    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}

/// `[reconnect]` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectSettings {
    /// Seconds to wait before the first attempt.
    pub delay_secs: f64,
    /// Seconds between attempts.
    pub interval_secs: f64,
    /// Overall budget in seconds.
    pub timeout_secs: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        let policy = ReconnectPolicy::default();
        Self {
            delay_secs: policy.delay.as_secs_f64(),
            interval_secs: policy.interval.as_secs_f64(),
            timeout_secs: policy.timeout.as_secs_f64(),
        }
    }
}

impl ReconnectSettings {
    /// Converts to a reconnect policy; invalid numbers take defaults.
    #[must_use]
    pub fn policy(&self) -> ReconnectPolicy {
        let defaults = ReconnectPolicy::default();
        ReconnectPolicy {
            delay: secs_or(self.delay_secs, defaults.delay.as_secs_f64()),
            interval: secs_or(self.interval_secs, defaults.interval.as_secs_f64()),
            timeout: secs_or(self.timeout_secs, defaults.timeout.as_secs_f64()),
        }
    }
}

/// Contents of `settings.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Discovery settings.
    pub discovery: DiscoverySettings,
    /// SSH settings.
    pub ssh: SshSettings,
    /// Reconnect settings.
    pub reconnect: ReconnectSettings,
    /// Logging settings.
    pub log: LogConfig,
}

impl Settings {
    /// Loads `settings.toml` from `dir`, writing a commented template on
    /// first use.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(SETTINGS_FILE);
        if !path.exists() {
            fs::create_dir_all(dir)?;
            Self::create_default(&path)?;
        }
        Self::load_from(&path)
    }

    /// Loads settings from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parses settings from TOML text.
    pub fn parse(content: &str) -> Result<Self> {
        let mut settings: Self = toml::from_str(content)?;
        settings.log.level = LogConfig::parse_level(&settings.log.level);
        Ok(settings)
    }

    fn create_default(path: &Path) -> Result<()> {
        let mut file = fs::File::create(path)?;
        file.write_all(DEFAULT_SETTINGS.as_bytes())?;
        Ok(())
    }
}

fn secs_or(value: f64, default: f64) -> Duration {
    Duration::try_from_secs_f64(value)
        .or_else(|_| Duration::try_from_secs_f64(default))
        .unwrap_or_default()
}

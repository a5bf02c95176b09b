//! Ed25519 key material.
//!
//! Two key pairs live in the config directory:
//! - the bundled default pair, deliberately insecure, shipped inside the
//!   binary so a factory-fresh device can be reached without setup
//! - the user pair, generated on first use
//!
//! [`KeyMaterial::init`] runs once per process and yields an immutable
//! value that is handed to the credential chain.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use rand_core::OsRng;
use ssh_key::{Algorithm, LineEnding, PrivateKey};
use tracing::{debug, info, warn};

use crate::error::{DeployError, Result};

/// File name of the bundled default private key.
pub const DEFAULT_PRIVATE_KEY_FILE: &str = "default_id_ed25519";

/// File name of the bundled default public key.
pub const DEFAULT_PUBLIC_KEY_FILE: &str = "default_id_ed25519.pub";

/// File name of the user private key.
pub const USER_PRIVATE_KEY_FILE: &str = "id_ed25519";

/// File name of the user public key.
pub const USER_PUBLIC_KEY_FILE: &str = "id_ed25519.pub";

const BUNDLED_PRIVATE_KEY: &str = include_str!("../../assets/default_id_ed25519");
const BUNDLED_PUBLIC_KEY: &str = include_str!("../../assets/default_id_ed25519.pub");

/// Paths and public halves of both key pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    user_private: PathBuf,
    user_public_key: String,
    default_private: PathBuf,
    default_public_key: String,
}

impl KeyMaterial {
    /// Installs the default pair if absent and loads or generates the
    /// user pair inside `dir`.
    pub fn init(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        install_default_keys(dir)?;
        let user_public_key = load_or_generate_user_keys(dir)?;

        Ok(Self {
            user_private: dir.join(USER_PRIVATE_KEY_FILE),
            user_public_key,
            default_private: dir.join(DEFAULT_PRIVATE_KEY_FILE),
            default_public_key: fs::read_to_string(dir.join(DEFAULT_PUBLIC_KEY_FILE))?,
        })
    }

    /// Path of the user private key.
    #[must_use]
    pub fn user_private_path(&self) -> &Path {
        &self.user_private
    }

    /// Path of the default private key.
    #[must_use]
    pub fn default_private_path(&self) -> &Path {
        &self.default_private
    }

    /// User public key in OpenSSH format.
    #[must_use]
    pub fn user_public_key(&self) -> &str {
        self.user_public_key.trim_end()
    }

    /// Default public key in OpenSSH format.
    #[must_use]
    pub fn default_public_key(&self) -> &str {
        self.default_public_key.trim_end()
    }
}

/// Copies the bundled default pair into `dir` unless already present.
fn install_default_keys(dir: &Path) -> Result<()> {
    let private = dir.join(DEFAULT_PRIVATE_KEY_FILE);
    if !private.exists() {
        write_private(&private, BUNDLED_PRIVATE_KEY)?;
        debug!("Installed default private key at {}", private.display());
    }

    let public = dir.join(DEFAULT_PUBLIC_KEY_FILE);
    if !public.exists() {
        write_public(&public, BUNDLED_PUBLIC_KEY)?;
    }

    Ok(())
}

/// Returns the user public key, generating the pair if needed.
fn load_or_generate_user_keys(dir: &Path) -> Result<String> {
    let private = dir.join(USER_PRIVATE_KEY_FILE);
    let public = dir.join(USER_PUBLIC_KEY_FILE);

    match (private.exists(), public.exists()) {
        (true, true) => Ok(fs::read_to_string(&public)?),
        (true, false) => {
            // Public half lost: derive it again.
            let key = PrivateKey::from_openssh(fs::read_to_string(&private)?)
                .map_err(|e| DeployError::Key(format!("{}: {}", private.display(), e)))?;
            let public_str = encode_public(&key)?;
            write_public(&public, &public_str)?;
            Ok(public_str)
        }
        (false, has_public) => {
            if has_public {
                warn!(
                    "Found {} without its private key, generating a new pair",
                    public.display()
                );
            }
            let (private_str, public_str) = generate_key_pair()?;
            write_private(&private, &private_str)?;
            write_public(&public, &public_str)?;
            info!("Generated new SSH key pair at {}", private.display());
            Ok(public_str)
        }
    }
}

/// Generates an Ed25519 pair as (OpenSSH private, OpenSSH public).
pub fn generate_key_pair() -> Result<(String, String)> {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519)
        .map_err(|e| DeployError::Key(e.to_string()))?;

    let private = key
        .to_openssh(LineEnding::LF)
        .map_err(|e| DeployError::Key(e.to_string()))?;
    let public = encode_public(&key)?;

    Ok((private.to_string(), public))
}

fn encode_public(key: &PrivateKey) -> Result<String> {
    let mut public = key
        .public_key()
        .to_openssh()
        .map_err(|e| DeployError::Key(e.to_string()))?;
    public.push('\n');
    Ok(public)
}

/// Writes a private key. On unix the file is created owner-only, so the
/// key is never readable by others, not even between create and chmod.
#[cfg(unix)]
fn write_private(path: &Path, content: &str) -> Result<()> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies on creation; an existing file keeps its bits.
    file.set_permissions(fs::Permissions::from_mode(0o600))?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(())
}

#[cfg(not(unix))]
fn write_private(path: &Path, content: &str) -> Result<()> {
    write_file(path, content)?;
    restrict_to_owner(path)
}

fn write_public(path: &Path, content: &str) -> Result<()> {
    write_file(path, content)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644))?;
    }

    Ok(())
}

fn write_file(path: &Path, content: &str) -> Result<()> {
    let mut file = fs::File::create(path)?;
    file.write_all(content.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Limits a file to owner read/write by replacing its ACL.
#[cfg(windows)]
fn restrict_to_owner(path: &Path) -> Result<()> {
    use std::process::Command;

    let user = std::env::var("USERNAME")
        .map_err(|_| DeployError::Key("USERNAME is not set".to_string()))?;

    let output = Command::new("icacls")
        .arg(path)
        .args(["/inheritance:r", "/grant:r"])
        .arg(format!("{}:(R,W)", user))
        .output()?;

    if output.status.success() {
        Ok(())
    } else {
        Err(DeployError::Key(format!(
            "icacls failed for {}: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

#[cfg(not(any(unix, windows)))]
fn restrict_to_owner(_path: &Path) -> Result<()> {
    Ok(())
}

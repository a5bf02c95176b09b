//! Connect-and-authenticate attempts over SSH.
//!
//! [`Transport`] is the seam between the negotiation/reconnect logic and
//! the wire. [`Ssh2Transport`] implements it with libssh2, bounding every
//! attempt with a TCP connect timeout and a session timeout.

use std::io::Read;
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use ssh2::{ErrorCode, Session};
use tracing::{debug, trace};

use super::credentials::CredentialSet;
use crate::error::ConnectError;
use crate::host::Address;

/// Default bound for a single connect/authenticate attempt.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Exit status OpenSSH reports when the connection drops under it.
pub const DISCONNECT_EXIT_CODE: i32 = 255;

/// libssh2 session error codes that mean the socket, not the credentials,
/// failed.
const SOCKET_SEND: i32 = -7;
const TIMEOUT: i32 = -9;
const SOCKET_DISCONNECT: i32 = -13;
const SOCKET_TIMEOUT: i32 = -30;
const SOCKET_RECV: i32 = -43;

/// How a remote command ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command exited with this status.
    Exited(i32),
    /// The session went away while the command was running.
    Disconnected,
}

/// Remote session primitives used by negotiation and reconnects.
pub trait Transport: Send + Sync {
    /// Connects to `addr` and authenticates with `creds`, then closes.
    fn authenticate(&self, addr: &Address, creds: &CredentialSet) -> Result<(), ConnectError>;

    /// Connects, authenticates and runs `command`.
    fn run_command(
        &self,
        addr: &Address,
        creds: &CredentialSet,
        command: &str,
    ) -> Result<CommandOutcome, ConnectError>;

    /// Establishes a session and runs a no-op.
    fn probe(&self, addr: &Address, creds: &CredentialSet) -> Result<(), ConnectError> {
        match self.run_command(addr, creds, "true")? {
            CommandOutcome::Exited(0) => Ok(()),
            CommandOutcome::Exited(code) => Err(ConnectError::Network(format!(
                "probe exited with status {}",
                code
            ))),
            CommandOutcome::Disconnected => {
                Err(ConnectError::Network("session dropped during probe".to_string()))
            }
        }
    }
}

/// libssh2-backed transport.
#[derive(Debug, Clone)]
pub struct Ssh2Transport {
    connect_timeout: Duration,
}

impl Ssh2Transport {
    /// Creates a transport with the given per-attempt bound.
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    fn open_session(
        &self,
        addr: &Address,
        creds: &CredentialSet,
    ) -> Result<Session, ConnectError> {
        let socket_addr = socket_addr(addr, creds.port_or_default())?;

        let stream = TcpStream::connect_timeout(&socket_addr, self.connect_timeout)
            .map_err(|e| ConnectError::Network(format!("connect to {}: {}", socket_addr, e)))?;
        set_io_timeouts(&stream, self.connect_timeout)?;

        let mut session =
            Session::new().map_err(|e| ConnectError::Network(format!("session: {}", e)))?;
        session.set_tcp_stream(stream);
        session.set_timeout(self.connect_timeout.as_millis() as u32);
        session
            .handshake()
            .map_err(|e| ConnectError::Network(format!("handshake with {}: {}", socket_addr, e)))?;

        authenticate_session(&session, creds)?;
        trace!("Authenticated to {} as {}", socket_addr, creds.describe());
        Ok(session)
    }
}

impl Default for Ssh2Transport {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl Transport for Ssh2Transport {
    fn authenticate(&self, addr: &Address, creds: &CredentialSet) -> Result<(), ConnectError> {
        let session = self.open_session(addr, creds)?;
        close(&session);
        Ok(())
    }

    fn run_command(
        &self,
        addr: &Address,
        creds: &CredentialSet,
        command: &str,
    ) -> Result<CommandOutcome, ConnectError> {
        let session = self.open_session(addr, creds)?;

        let mut channel = session
            .channel_session()
            .map_err(|e| ConnectError::Network(format!("open channel: {}", e)))?;
        channel
            .exec(command)
            .map_err(|e| ConnectError::Network(format!("exec `{}`: {}", command, e)))?;

        // From here on a failure means the remote side went away.
        let mut output = String::new();
        if let Err(e) = channel.read_to_string(&mut output) {
            debug!("`{}` on {} lost its session: {}", command, addr, e);
            return Ok(CommandOutcome::Disconnected);
        }
        if let Err(e) = channel.wait_close() {
            debug!("`{}` on {} lost its session: {}", command, addr, e);
            return Ok(CommandOutcome::Disconnected);
        }

        let outcome = match channel.exit_status() {
            Ok(code) => CommandOutcome::Exited(code),
            Err(_) => CommandOutcome::Disconnected,
        };
        trace!("`{}` on {} -> {:?}: {}", command, addr, outcome, output.trim());

        close(&session);
        Ok(outcome)
    }
}

fn set_io_timeouts(stream: &TcpStream, timeout: Duration) -> Result<(), ConnectError> {
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|()| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| ConnectError::Network(format!("socket timeout: {}", e)))
}

fn close(session: &Session) {
    let _ = session.disconnect(None, "done", None);
}

/// Maps an address and port onto a socket address.
fn socket_addr(addr: &Address, port: u16) -> Result<SocketAddr, ConnectError> {
    if let Some(ip) = addr.ip() {
        return Ok(match ip {
            IpAddr::V6(v6) => {
                let scope_id = addr
                    .as_str()
                    .split_once('%')
                    .and_then(|(_, scope)| scope.parse().ok())
                    .unwrap_or(0);
                SocketAddr::V6(std::net::SocketAddrV6::new(v6, port, 0, scope_id))
            }
            IpAddr::V4(_) => SocketAddr::new(ip, port),
        });
    }

    let host = addr.as_str().trim_end_matches('.');
    (host, port)
        .to_socket_addrs()
        .map_err(|e| ConnectError::Network(format!("lookup {}: {}", host, e)))?
        .next()
        .ok_or_else(|| ConnectError::Network(format!("{} has no addresses", host)))
}

/// Runs the authentication methods the set calls for.
fn authenticate_session(session: &Session, creds: &CredentialSet) -> Result<(), ConnectError> {
    let user = creds.user.clone().unwrap_or_else(local_user);

    if let Some(ref key) = creds.key_path {
        session
            .userauth_pubkey_file(&user, None, key, creds.key_passphrase.as_deref())
            .map_err(classify_auth_error)?;
    } else if let Some(ref password) = creds.password {
        session
            .userauth_password(&user, password)
            .map_err(classify_auth_error)?;
    } else {
        // A "none" request; some images let root in without a password.
        let methods = session.auth_methods(&user).map_err(classify_auth_error)?;
        if !session.authenticated() {
            debug!("Server offers {} for {}, trying agent", methods, user);
            session.userauth_agent(&user).map_err(classify_auth_error)?;
        }
    }

    if session.authenticated() {
        Ok(())
    } else {
        Err(ConnectError::Auth(format!("{} was not authenticated", user)))
    }
}

/// Socket-level errors are network failures, everything else is a
/// rejection.
fn classify_auth_error(err: ssh2::Error) -> ConnectError {
    match err.code() {
        ErrorCode::Session(
            SOCKET_SEND | TIMEOUT | SOCKET_DISCONNECT | SOCKET_TIMEOUT | SOCKET_RECV,
        ) => ConnectError::Network(err.to_string()),
        _ => ConnectError::Auth(err.to_string()),
    }
}

/// Name of the local user, used when a set names none.
fn local_user() -> String {
    std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| super::credentials::FALLBACK_USER.to_string())
}

//! SSH connection configuration.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use super::connection::Remote;

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys.
    Strict,

    /// Learn unknown keys, reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. For testing and lab use only.
    Disabled,
}

/// SSH connection configuration.
#[derive(Debug)]
pub struct SshConfig {
    /// Display name for log lines; defaults to the host.
    pub name: Option<String>,

    /// Target host (hostname or IP address).
    pub host: String,

    /// SSH port (default: 22).
    pub port: u16,

    /// Username for authentication.
    pub username: String,

    pub auth: AuthMethod,

    /// Connection and inactivity timeout.
    pub timeout: Duration,

    /// Terminal width requested with a PTY.
    pub terminal_width: u32,

    /// Terminal height requested with a PTY.
    pub terminal_height: u32,

    pub host_key_verification: HostKeyVerification,

    /// known_hosts file; the user's default when `None`.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    /// Remote descriptor for this configuration.
    pub fn remote(&self) -> Remote {
        let remote = Remote::new(&self.host, self.port, &self.username);
        match &self.name {
            Some(name) => remote.with_name(name),
            None => remote,
        }
    }
}

/// Authentication method for SSH connections.
#[derive(Debug)]
pub enum AuthMethod {
    /// No authentication (for testing only).
    None,

    Password(SecretString),

    PrivateKey {
        path: PathBuf,
        passphrase: Option<SecretString>,
    },
}

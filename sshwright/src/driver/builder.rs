//! Builder for SSH-backed executors.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;

use super::executor::Executor;
use crate::error::{Result, TransportError};
use crate::transport::{AuthMethod, DEFAULT_POLL_INTERVAL, HostKeyVerification, SshConfig, SshTransport};

/// Builder for an [`Executor`] over an [`SshTransport`].
///
/// # Example
///
/// ```rust,no_run
/// use sshwright::driver::{ExecutionSettings, ExecutorBuilder};
///
/// # async fn example() -> Result<(), sshwright::Error> {
/// let executor = ExecutorBuilder::new("192.168.1.1")
///     .username("deploy")
///     .password("secret")
///     .connect()
///     .await?;
///
/// let uptime = executor.execute(&ExecutionSettings::default(), "uptime").await?;
/// println!("{uptime}");
/// # Ok(())
/// # }
/// ```
pub struct ExecutorBuilder {
    name: Option<String>,
    host: String,
    port: u16,
    username: Option<String>,
    auth: AuthMethod,
    timeout: Duration,
    terminal_width: u32,
    terminal_height: u32,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    poll_interval: Duration,
}

impl ExecutorBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            name: None,
            host: host.into(),
            port: 22,
            username: None,
            auth: AuthMethod::None,
            timeout: Duration::from_secs(30),
            terminal_width: 80,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Name shown in log lines instead of the host.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the SSH port (default: 22).
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = AuthMethod::Password(SecretString::from(password.into()));
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        };
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.auth = AuthMethod::PrivateKey {
            path: key_path.into(),
            passphrase: Some(SecretString::from(passphrase.into())),
        };
        self
    }

    /// Set the connection timeout (default: 30s).
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Terminal dimensions used when a PTY is requested.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    pub fn known_hosts_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Interval at which foreground calls poll for channel closure.
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Validate the settings into an [`SshConfig`] without connecting.
    pub fn build_config(self) -> Result<SshConfig> {
        let username = self.username.ok_or_else(|| TransportError::InvalidConfig {
            message: "Username is required".to_string(),
        })?;
        if self.host.is_empty() {
            return Err(TransportError::InvalidConfig {
                message: "Host is required".to_string(),
            }
            .into());
        }

        Ok(SshConfig {
            name: self.name,
            host: self.host,
            port: self.port,
            username,
            auth: self.auth,
            timeout: self.timeout,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
        })
    }

    /// Connect, authenticate, and wrap the session in an executor.
    pub async fn connect(self) -> Result<Executor<SshTransport>> {
        let poll_interval = self.poll_interval;
        let transport = SshTransport::connect(self.build_config()?).await?;
        Ok(Executor::new(Arc::new(transport)).with_poll_interval(poll_interval))
    }
}

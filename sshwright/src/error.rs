//! Error types for sshwright.

use thiserror::Error;

/// Main error type for sshwright operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel operation errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Remote execution outcome errors
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),
}

impl Error {
    /// The remote exit status, if this error reports a bad exit status.
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            Error::Execution(ExecutionError::BadExitStatus { exit_status, .. }) => {
                Some(*exit_status)
            }
            _ => None,
        }
    }
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Host is not present in known_hosts and strict checking is on
    #[error("Host key for {host}:{port} is not known")]
    HostKeyUnknown { host: String, port: u16 },

    /// Host key differs from the one recorded in known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// known_hosts could not be read or written
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection settings are incomplete or inconsistent
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    /// Operation timed out
    #[error("Operation timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Channel layer errors (opening, requests, interaction patterns).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// Failed to open a session channel
    #[error("Failed to open channel: {0}")]
    OpenFailed(russh::Error),

    /// The server rejected a channel request (pty, shell, exec, subsystem)
    #[error("Channel request '{request}' failed: {source}")]
    RequestFailed {
        request: &'static str,
        #[source]
        source: russh::Error,
    },

    /// Channel was already connected
    #[error("Channel #{0} is already connected")]
    AlreadyConnected(u32),

    /// Channel closed
    #[error("Channel closed")]
    Closed,

    /// No scripted process registered for a command
    #[error("No scripted process for command '{0}'")]
    UnknownCommand(String),

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Errors describing how a remote operation ended.
#[derive(Error, Debug)]
pub enum ExecutionError {
    /// The remote shell or command exited with a non-zero status
    #[error("{message}")]
    BadExitStatus { message: String, exit_status: i32 },

    /// One or more background executions failed
    #[error("{} background execution(s) failed", .0.len())]
    BackgroundFailures(Vec<Error>),

    /// A result callback panicked
    #[error("Result callback panicked: {0}")]
    CallbackPanicked(String),
}

impl ExecutionError {
    /// Non-zero exit status of an interactive shell.
    pub fn shell(exit_status: i32) -> Self {
        Self::BadExitStatus {
            message: format!("Shell returned exit status {exit_status}"),
            exit_status,
        }
    }

    /// Non-zero exit status of a single command.
    pub fn command(exit_status: i32) -> Self {
        Self::BadExitStatus {
            message: format!("Command returned exit status {exit_status}"),
            exit_status,
        }
    }
}

/// Result type alias using sshwright's Error.
pub type Result<T> = std::result::Result<T, Error>;

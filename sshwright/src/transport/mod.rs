//! Transport collaborators.
//!
//! The execution core only talks to the [`Connection`] and
//! [`RemoteChannel`] traits. [`SshTransport`] implements them over russh;
//! [`ScriptedConnection`] plays back scripted processes in-process.

pub mod config;
mod connection;
pub mod scripted;
mod ssh;

pub use config::{AuthMethod, HostKeyVerification, SshConfig};
pub use connection::{
    ChannelKind, ChannelOptions, Connection, DEFAULT_POLL_INTERVAL, Remote, RemoteChannel,
    wait_until_closed,
};
pub use scripted::{InputLog, Script, ScriptedChannel, ScriptedConnection};
pub use ssh::{SshChannel, SshTransport};

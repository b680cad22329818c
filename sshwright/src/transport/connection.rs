//! Capabilities the execution core consumes from a transport.

use std::fmt;
use std::future::Future;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::trace;

use crate::channel::{InputSink, OutputSink};
use crate::error::Result;

/// Interval at which channel closure is polled.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Identity of the remote end, used in log lines and diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Remote {
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
}

impl Remote {
    /// A remote named after its host.
    pub fn new(host: impl Into<String>, port: u16, user: impl Into<String>) -> Self {
        let host = host.into();
        Self {
            name: host.clone(),
            host,
            port,
            user: user.into(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl fmt::Display for Remote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// What a channel runs on the remote side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    /// Interactive login shell.
    Shell,
    /// A single command, foreground or background.
    Command,
    /// The `sftp` subsystem.
    Sftp,
}

/// Per-channel transport options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChannelOptions {
    /// Request a pseudo-terminal.
    pub pty: bool,
}

/// One remote operation's session handle.
///
/// Created not yet connected. Output sinks must be assigned before
/// [`connect`](Self::connect); the transport then delivers output on its own
/// task. When the remote side ends, implementations record the exit status,
/// close both sinks, and only then report [`is_closed`](Self::is_closed).
pub trait RemoteChannel: Send {
    /// Diagnostic identifier, unique per connection.
    fn id(&self) -> u32;

    fn kind(&self) -> ChannelKind;

    /// Handle to the remote process's standard input.
    fn input(&self) -> InputSink;

    /// Receiver for standard output.
    fn set_output_sink(&mut self, sink: Box<dyn OutputSink>);

    /// Receiver for standard error.
    fn set_error_sink(&mut self, sink: Box<dyn OutputSink>);

    /// Open the channel and start the remote operation.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release transport resources, closing the channel if still open.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    fn is_closed(&self) -> bool;

    /// Exit status reported by the remote process; `None` until closed or
    /// if the process ended without reporting one.
    fn exit_status(&self) -> Option<i32>;
}

/// An established session that can open channels.
///
/// Shared through `Arc`; any number of channels may be open at once.
pub trait Connection: Send + Sync + 'static {
    type Channel: RemoteChannel + 'static;

    fn remote(&self) -> &Remote;

    fn create_shell_channel(&self, options: &ChannelOptions) -> Result<Self::Channel>;

    fn create_execution_channel(
        &self,
        command: &str,
        options: &ChannelOptions,
    ) -> Result<Self::Channel>;

    fn create_sftp_channel(&self) -> Result<Self::Channel>;

    /// Run `handler` with the channel once it has closed.
    ///
    /// The default spawns a tokio task that polls the channel at
    /// [`DEFAULT_POLL_INTERVAL`], so it must be called from within a runtime.
    fn when_closed<F, Fut>(&self, channel: Self::Channel, handler: F)
    where
        F: FnOnce(Self::Channel) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut channel = channel;
            wait_until_closed(&mut channel, DEFAULT_POLL_INTERVAL).await;
            handler(channel).await;
        });
    }
}

/// Poll `channel` every `interval` until it reports closed.
pub async fn wait_until_closed<C>(channel: &mut C, interval: Duration)
where
    C: RemoteChannel + ?Sized,
{
    while !channel.is_closed() {
        tokio::time::sleep(interval).await;
    }
    trace!("channel #{} observed closed", channel.id());
}

/// Closed flag and exit status shared between a channel handle and its
/// delivery task.
#[derive(Debug, Default)]
pub(crate) struct ChannelState {
    closed: AtomicBool,
    exit_status: OnceLock<i32>,
}

impl ChannelState {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_closed(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Only the first reported status is kept.
    pub(crate) fn set_exit_status(&self, status: i32) {
        let _ = self.exit_status.set(status);
    }

    pub(crate) fn exit_status(&self) -> Option<i32> {
        self.exit_status.get().copied()
    }
}

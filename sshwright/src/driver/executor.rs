//! Channel execution core.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};

use super::background::BackgroundMonitor;
use super::settings::ExecutionSettings;
use crate::channel::{LineClassifier, LineCollector, LogListener, StreamTag};
use crate::error::{ExecutionError, Result};
use crate::interaction::InteractionEngine;
use crate::transport::{
    ChannelKind, Connection, DEFAULT_POLL_INTERVAL, Remote, RemoteChannel, wait_until_closed,
};

/// Exit status assumed when a channel closes without reporting one.
pub const MISSING_EXIT_STATUS: i32 = -1;

/// Runs shells and commands over a [`Connection`].
///
/// Every call opens its own channel, so one executor can run any number of
/// operations concurrently; each accumulates its own output.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use sshwright::driver::{ExecutionSettings, Executor};
/// use sshwright::transport::{Script, ScriptedConnection};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), sshwright::Error> {
/// let connection = ScriptedConnection::new("web01");
/// connection.on_command("uname", Script::new().stdout("Linux\n"));
///
/// let executor = Executor::new(Arc::new(connection));
/// let result = executor.execute(&ExecutionSettings::default(), "uname").await?;
/// assert_eq!(result, "Linux");
/// # Ok(())
/// # }
/// ```
pub struct Executor<C: Connection> {
    connection: Arc<C>,
    poll_interval: Duration,
    background: BackgroundMonitor,
}

impl<C: Connection> Clone for Executor<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            poll_interval: self.poll_interval,
            background: self.background.clone(),
        }
    }
}

impl<C: Connection> Executor<C> {
    pub fn new(connection: Arc<C>) -> Self {
        Self {
            connection,
            poll_interval: DEFAULT_POLL_INTERVAL,
            background: BackgroundMonitor::new(),
        }
    }

    /// Interval at which foreground calls poll for channel closure.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    pub fn remote(&self) -> &Remote {
        self.connection.remote()
    }

    pub fn background(&self) -> &BackgroundMonitor {
        &self.background
    }

    /// Run an interactive shell until it exits.
    ///
    /// Fails with a bad exit status error ("Shell returned exit status N")
    /// unless the shell exits with 0. The channel is always disconnected.
    pub async fn run_shell(&self, settings: &ExecutionSettings) -> Result<()> {
        let remote = self.remote();
        if settings.dry_run {
            info!("Dry run: shell on {}", remote);
            return Ok(());
        }

        let mut channel = self
            .connection
            .create_shell_channel(&settings.channel_options())?;
        self.wire(&mut channel, settings, false);

        debug!("Started shell {}#{}", remote, channel.id());
        let outcome = self
            .run_foreground(&mut channel, ChannelKind::Shell, settings)
            .await;
        let outcome = release(&mut channel, outcome).await;

        match &outcome {
            Ok(()) => debug!("Success shell {}#{}", remote, channel.id()),
            Err(e) => error!("Failed shell {}#{}: {}", remote, channel.id(), e),
        }
        outcome
    }

    /// Run `command` and return its standard output lines joined with the
    /// platform line separator.
    ///
    /// The settings' callback, if any, is invoked with the same value before
    /// it is returned. A non-zero exit status fails with "Command returned
    /// exit status N". The channel is always disconnected.
    pub async fn execute(&self, settings: &ExecutionSettings, command: &str) -> Result<String> {
        let remote = self.remote();
        if settings.dry_run {
            info!("Dry run: {}|{}", remote, command);
            settings.invoke_callback("");
            return Ok(String::new());
        }

        let mut channel = self
            .connection
            .create_execution_channel(command, &settings.channel_options())?;
        let collector = self.wire(&mut channel, settings, true);

        debug!("Started command {}#{}: {}", remote, channel.id(), command);
        let outcome = self
            .run_foreground(&mut channel, ChannelKind::Command, settings)
            .await;
        if let Err(e) = release(&mut channel, outcome).await {
            error!("Failed command {}#{}: {}", remote, channel.id(), e);
            return Err(e);
        }
        debug!("Success command {}#{}: {}", remote, channel.id(), command);

        let result = collector.map(|c| c.join()).unwrap_or_default();
        settings.invoke_callback(&result);
        Ok(result)
    }

    /// Start `command` and return as soon as the channel is connected.
    ///
    /// Exit status handling, the callback and the disconnect happen when
    /// the connection reports the channel closed. Failures are logged and
    /// collected by [`background`](Self::background); call
    /// [`wait_for_background`](Self::wait_for_background) to observe them.
    /// A panicking callback is recorded as a failure.
    pub async fn execute_background(
        &self,
        settings: &ExecutionSettings,
        command: &str,
    ) -> Result<()> {
        let remote = self.remote().clone();
        if settings.dry_run {
            info!("Dry run: {}|{} (background)", remote, command);
            settings.invoke_callback("");
            return Ok(());
        }

        let mut channel = self
            .connection
            .create_execution_channel(command, &settings.channel_options())?;
        let collector = self.wire(&mut channel, settings, true).unwrap_or_default();

        if let Err(e) = channel.connect().await {
            return release(&mut channel, Err(e)).await;
        }
        let id = channel.id();
        debug!("Started command {}#{} in background: {}", remote, id, command);

        let monitor = self.background.clone();
        let settings = settings.clone();
        let command = command.to_string();
        monitor.begin();

        self.connection.when_closed(channel, move |channel| async move {
            let mut channel = channel;
            let outcome = enforce_exit_status(
                ChannelKind::Command,
                channel.exit_status(),
                settings.ignore_error,
            );
            let outcome = release(&mut channel, outcome).await.and_then(|()| {
                debug!("Success command {}#{}: {}", remote, id, command);
                let result = collector.join();
                panic::catch_unwind(AssertUnwindSafe(|| settings.invoke_callback(&result)))
                    .map_err(|payload| {
                        ExecutionError::CallbackPanicked(panic_message(&*payload)).into()
                    })
            });

            if let Err(e) = &outcome {
                error!("Failed command {}#{}: {}", remote, id, e);
            }
            monitor.finish(outcome);
        });

        Ok(())
    }

    /// Wait for every background execution started by this executor (or its
    /// clones) and report the ones that failed.
    pub async fn wait_for_background(&self) -> Result<()> {
        self.background.wait().await
    }

    /// Open an sftp subsystem channel, hand it to `block`, and disconnect
    /// afterwards whatever the block returns.
    pub async fn sftp<F, T>(&self, block: F) -> Result<T>
    where
        F: AsyncFnOnce(&mut C::Channel) -> Result<T>,
    {
        let mut channel = self.connection.create_sftp_channel()?;
        let outcome = match channel.connect().await {
            Ok(()) => {
                debug!("Started sftp {}#{}", self.remote(), channel.id());
                block(&mut channel).await
            }
            Err(e) => Err(e),
        };
        release(&mut channel, outcome).await
    }

    /// Install classifiers (and the interaction engine) on both streams.
    /// Returns the standard output collector when `collect` is set.
    fn wire(
        &self,
        channel: &mut C::Channel,
        settings: &ExecutionSettings,
        collect: bool,
    ) -> Option<LineCollector> {
        let mut stdout = LineClassifier::new(StreamTag::StandardOutput);
        let mut stderr = LineClassifier::new(StreamTag::StandardError);

        if settings.logging {
            let prefix = self.remote().to_string();
            stdout.add_listener(LogListener::new(&prefix, settings.output_log_level));
            stderr.add_listener(LogListener::new(prefix, settings.error_log_level));
        }

        let collector = collect.then(LineCollector::new);
        if let Some(collector) = &collector {
            stdout.add_listener(collector.clone());
        }

        if let Some(rules) = &settings.interaction {
            let engine = InteractionEngine::new(rules.clone(), channel.input());
            engine.attach(&mut stdout);
            engine.attach(&mut stderr);
        }

        channel.set_output_sink(Box::new(stdout));
        channel.set_error_sink(Box::new(stderr));
        collector
    }

    async fn run_foreground(
        &self,
        channel: &mut C::Channel,
        kind: ChannelKind,
        settings: &ExecutionSettings,
    ) -> Result<()> {
        channel.connect().await?;
        wait_until_closed(channel, self.poll_interval).await;
        enforce_exit_status(kind, channel.exit_status(), settings.ignore_error)
    }
}

/// Turn a channel's exit status into the call's outcome.
fn enforce_exit_status(kind: ChannelKind, status: Option<i32>, ignore_error: bool) -> Result<()> {
    let status = status.unwrap_or(MISSING_EXIT_STATUS);
    if status == 0 {
        return Ok(());
    }

    let error = match kind {
        ChannelKind::Shell => ExecutionError::shell(status),
        ChannelKind::Command | ChannelKind::Sftp => ExecutionError::command(status),
    };
    if ignore_error {
        warn!("{} (ignored)", error);
        return Ok(());
    }
    Err(error.into())
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Disconnect `channel`, keeping `outcome` unless only the disconnect failed.
async fn release<Ch, T>(channel: &mut Ch, outcome: Result<T>) -> Result<T>
where
    Ch: RemoteChannel,
{
    match channel.disconnect().await {
        Ok(()) => outcome,
        Err(e) if outcome.is_err() => {
            warn!("channel #{}: disconnect failed: {}", channel.id(), e);
            outcome
        }
        Err(e) => Err(e),
    }
}

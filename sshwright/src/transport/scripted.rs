//! In-process connection that plays back scripted remote processes.
//!
//! Useful for exercising automation (interaction rules, callbacks, exit
//! status handling) without a server. Each command, the shell, or the sftp
//! subsystem is bound to a [`Script`]: a sequence of output chunks, waits
//! for expected input, and pauses, ending with an exit status.
//!
//! ```rust
//! use sshwright::transport::{Script, ScriptedConnection};
//!
//! let connection = ScriptedConnection::new("lab");
//! let stdin = connection.on_command(
//!     "apt-get upgrade",
//!     Script::new()
//!         .stdout("Do you want to continue? [Y/n] \n")
//!         .expect_input("y\n")
//!         .stdout("done\n")
//!         .exit(0),
//! );
//! assert!(stdin.contents().is_empty());
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use bytes::Bytes;
use log::trace;
use memchr::memmem;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::connection::{ChannelKind, ChannelOptions, ChannelState, Connection, Remote, RemoteChannel};
use crate::channel::{DiscardSink, InputSink, OutputSink};
use crate::error::{ChannelError, Result};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone)]
enum Step {
    Stdout(Bytes),
    Stderr(Bytes),
    Expect(Bytes),
    Sleep(Duration),
    Hang,
}

/// Behaviour of one scripted remote process.
#[derive(Debug, Clone)]
pub struct Script {
    steps: Vec<Step>,
    exit_status: Option<i32>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            steps: Vec::new(),
            exit_status: Some(0),
        }
    }
}

impl Script {
    /// An empty script exiting with status 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit bytes on standard output.
    pub fn stdout(mut self, data: impl Into<Bytes>) -> Self {
        self.steps.push(Step::Stdout(data.into()));
        self
    }

    /// Emit bytes on standard error.
    pub fn stderr(mut self, data: impl Into<Bytes>) -> Self {
        self.steps.push(Step::Stderr(data.into()));
        self
    }

    /// Block until standard input has received these bytes.
    pub fn expect_input(mut self, data: impl Into<Bytes>) -> Self {
        self.steps.push(Step::Expect(data.into()));
        self
    }

    pub fn sleep(mut self, duration: Duration) -> Self {
        self.steps.push(Step::Sleep(duration));
        self
    }

    /// Never finish; only a disconnect ends the channel.
    pub fn hang(mut self) -> Self {
        self.steps.push(Step::Hang);
        self
    }

    pub fn exit(mut self, status: i32) -> Self {
        self.exit_status = Some(status);
        self
    }

    /// Close without reporting an exit status, like a process killed by a
    /// signal.
    pub fn without_exit_status(mut self) -> Self {
        self.exit_status = None;
        self
    }
}

/// Everything written to a scripted process's standard input, across all
/// channels that ran the script.
#[derive(Debug, Clone, Default)]
pub struct InputLog {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl InputLog {
    fn append(&self, data: &[u8]) {
        lock(&self.bytes).extend_from_slice(data);
    }

    pub fn contents(&self) -> Vec<u8> {
        lock(&self.bytes).clone()
    }

    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&lock(&self.bytes)).into_owned()
    }

    /// Number of non-overlapping occurrences of `needle`.
    pub fn count(&self, needle: &str) -> usize {
        let bytes = lock(&self.bytes);
        memmem::find_iter(&bytes, needle.as_bytes()).count()
    }
}

type Binding = (Script, InputLog);

/// [`Connection`] backed by scripts instead of a network session.
#[derive(Debug)]
pub struct ScriptedConnection {
    remote: Remote,
    commands: Mutex<HashMap<String, Binding>>,
    shell: Mutex<Option<Binding>>,
    sftp: Mutex<Option<Binding>>,
    next_channel_id: AtomicU32,
    disconnects: Arc<AtomicUsize>,
}

impl ScriptedConnection {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            remote: Remote::new("localhost", 22, "scripted").with_name(name),
            commands: Mutex::new(HashMap::new()),
            shell: Mutex::new(None),
            sftp: Mutex::new(None),
            next_channel_id: AtomicU32::new(0),
            disconnects: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Play `script` whenever `command` is executed.
    pub fn on_command(&self, command: impl Into<String>, script: Script) -> InputLog {
        let log = InputLog::default();
        lock(&self.commands).insert(command.into(), (script, log.clone()));
        log
    }

    /// Play `script` for shell channels.
    pub fn on_shell(&self, script: Script) -> InputLog {
        let log = InputLog::default();
        *lock(&self.shell) = Some((script, log.clone()));
        log
    }

    /// Play `script` for sftp channels.
    pub fn on_sftp(&self, script: Script) -> InputLog {
        let log = InputLog::default();
        *lock(&self.sftp) = Some((script, log.clone()));
        log
    }

    /// Number of channels opened so far.
    pub fn channels_opened(&self) -> u32 {
        self.next_channel_id.load(Ordering::Relaxed)
    }

    /// Number of `disconnect` calls made on connected channels.
    pub fn disconnects(&self) -> usize {
        self.disconnects.load(Ordering::Relaxed)
    }

    fn channel(&self, kind: ChannelKind, binding: Binding) -> ScriptedChannel {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (input, input_rx) = InputSink::pair();
        let (script, log) = binding;
        ScriptedChannel {
            id,
            kind,
            script,
            log,
            stdout: Some(Box::new(DiscardSink)),
            stderr: Some(Box::new(DiscardSink)),
            input,
            input_rx: Some(input_rx),
            state: Arc::new(ChannelState::default()),
            disconnects: self.disconnects.clone(),
            task: None,
        }
    }
}

impl Connection for ScriptedConnection {
    type Channel = ScriptedChannel;

    fn remote(&self) -> &Remote {
        &self.remote
    }

    fn create_shell_channel(&self, _options: &ChannelOptions) -> Result<ScriptedChannel> {
        let binding = lock(&self.shell).clone().unwrap_or_default();
        Ok(self.channel(ChannelKind::Shell, binding))
    }

    fn create_execution_channel(
        &self,
        command: &str,
        _options: &ChannelOptions,
    ) -> Result<ScriptedChannel> {
        let binding = lock(&self.commands)
            .get(command)
            .cloned()
            .ok_or_else(|| ChannelError::UnknownCommand(command.to_string()))?;
        Ok(self.channel(ChannelKind::Command, binding))
    }

    fn create_sftp_channel(&self) -> Result<ScriptedChannel> {
        let binding = lock(&self.sftp).clone().unwrap_or_default();
        Ok(self.channel(ChannelKind::Sftp, binding))
    }
}

/// Channel created by a [`ScriptedConnection`].
pub struct ScriptedChannel {
    id: u32,
    kind: ChannelKind,
    script: Script,
    log: InputLog,
    stdout: Option<Box<dyn OutputSink>>,
    stderr: Option<Box<dyn OutputSink>>,
    input: InputSink,
    input_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    state: Arc<ChannelState>,
    disconnects: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

impl RemoteChannel for ScriptedChannel {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> ChannelKind {
        self.kind
    }

    fn input(&self) -> InputSink {
        self.input.clone()
    }

    fn set_output_sink(&mut self, sink: Box<dyn OutputSink>) {
        self.stdout = Some(sink);
    }

    fn set_error_sink(&mut self, sink: Box<dyn OutputSink>) {
        self.stderr = Some(sink);
    }

    async fn connect(&mut self) -> Result<()> {
        let input_rx = self
            .input_rx
            .take()
            .ok_or(ChannelError::AlreadyConnected(self.id))?;
        let process = Process {
            id: self.id,
            script: self.script.clone(),
            log: self.log.clone(),
            stdout: self.stdout.take().unwrap_or_else(|| Box::new(DiscardSink)),
            stderr: self.stderr.take().unwrap_or_else(|| Box::new(DiscardSink)),
            input_rx,
            state: self.state.clone(),
        };
        self.task = Some(tokio::spawn(process.run()));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        if !task.is_finished() {
            task.abort();
            let _ = task.await;
        }
        self.state.mark_closed();
        self.disconnects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn exit_status(&self) -> Option<i32> {
        self.state.exit_status()
    }
}

struct Process {
    id: u32,
    script: Script,
    log: InputLog,
    stdout: Box<dyn OutputSink>,
    stderr: Box<dyn OutputSink>,
    input_rx: mpsc::UnboundedReceiver<Bytes>,
    state: Arc<ChannelState>,
}

impl Process {
    async fn run(mut self) {
        let mut pending: Vec<u8> = Vec::new();
        let steps = std::mem::take(&mut self.script.steps);

        for step in steps {
            match step {
                Step::Stdout(data) => self.stdout.write(&data),
                Step::Stderr(data) => self.stderr.write(&data),
                Step::Sleep(duration) => tokio::time::sleep(duration).await,
                Step::Hang => std::future::pending::<()>().await,
                Step::Expect(expected) => {
                    if !self.receive(&mut pending, &expected).await {
                        trace!("scripted #{}: stdin closed while waiting", self.id);
                        break;
                    }
                }
            }
        }

        while let Ok(chunk) = self.input_rx.try_recv() {
            self.log.append(&chunk);
        }
        if let Some(status) = self.script.exit_status {
            self.state.set_exit_status(status);
        }
        self.stdout.close();
        self.stderr.close();
        self.state.mark_closed();
    }

    /// Read stdin until `expected` has arrived; consumes through the match.
    async fn receive(&mut self, pending: &mut Vec<u8>, expected: &[u8]) -> bool {
        loop {
            if let Some(pos) = memmem::find(pending, expected) {
                pending.drain(..pos + expected.len());
                return true;
            }
            match self.input_rx.recv().await {
                Some(chunk) => {
                    self.log.append(&chunk);
                    pending.extend_from_slice(&chunk);
                }
                None => return false,
            }
        }
    }
}

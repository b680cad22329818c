//! SSH transport implementation using russh.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use log::{debug, trace, warn};
use russh::client::{self, Handle, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{Channel, ChannelMsg};
use secrecy::ExposeSecret;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;

use super::config::{AuthMethod, HostKeyVerification, SshConfig};
use super::connection::{ChannelKind, ChannelOptions, ChannelState, Connection, Remote, RemoteChannel};
use crate::channel::{DiscardSink, InputSink, OutputSink};
use crate::error::{ChannelError, Result, TransportError};

/// Authenticated SSH session able to open command, shell and sftp channels.
pub struct SshTransport {
    session: Arc<Handle<SshHandler>>,
    remote: Remote,
    terminal_size: (u32, u32),
    next_channel_id: AtomicU32,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    pub async fn connect(config: SshConfig) -> Result<Self> {
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: Some(config.timeout),
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: config.host.clone(),
            port: config.port,
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        let mut session = tokio::time::timeout(
            config.timeout,
            client::connect(ssh_config, (config.host.as_str(), config.port), handler),
        )
        .await
        .map_err(|_| TransportError::Timeout(config.timeout))?
        .map_err(|e| {
            // Prefer the detailed host key error over russh's generic one
            let detailed = host_key_error
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .take();
            detailed.unwrap_or(TransportError::Ssh(e))
        })?;

        authenticate(&mut session, &config).await?;

        let remote = config.remote();
        debug!("Connected to {} ({}@{}:{})", remote, remote.user, remote.host, remote.port);

        Ok(Self {
            session: Arc::new(session),
            remote,
            terminal_size: (config.terminal_width, config.terminal_height),
            next_channel_id: AtomicU32::new(0),
        })
    }

    /// Close the connection.
    pub async fn close(self) -> Result<()> {
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        debug!("Disconnected from {}", self.remote);
        Ok(())
    }

    /// Whether the session's background task is still running.
    pub fn is_alive(&self) -> bool {
        !self.session.is_closed()
    }

    fn channel(&self, request: ChannelRequest, options: &ChannelOptions) -> SshChannel {
        let id = self.next_channel_id.fetch_add(1, Ordering::Relaxed);
        let (input, input_rx) = InputSink::pair();
        SshChannel {
            id,
            session: self.session.clone(),
            request,
            pty: options.pty.then_some(self.terminal_size),
            stdout: Some(Box::new(DiscardSink)),
            stderr: Some(Box::new(DiscardSink)),
            input,
            input_rx: Some(input_rx),
            state: Arc::new(ChannelState::default()),
            shutdown: Arc::new(Notify::new()),
            task: None,
        }
    }
}

impl Connection for SshTransport {
    type Channel = SshChannel;

    fn remote(&self) -> &Remote {
        &self.remote
    }

    fn create_shell_channel(&self, options: &ChannelOptions) -> Result<SshChannel> {
        Ok(self.channel(ChannelRequest::Shell, options))
    }

    fn create_execution_channel(&self, command: &str, options: &ChannelOptions) -> Result<SshChannel> {
        Ok(self.channel(ChannelRequest::Exec(command.to_string()), options))
    }

    fn create_sftp_channel(&self) -> Result<SshChannel> {
        Ok(self.channel(ChannelRequest::Subsystem("sftp"), &ChannelOptions::default()))
    }
}

async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
    let success = match &config.auth {
        AuthMethod::None => session
            .authenticate_none(&config.username)
            .await
            .map_err(TransportError::Ssh)?
            .success(),
        AuthMethod::Password(password) => session
            .authenticate_password(&config.username, password.expose_secret())
            .await
            .map_err(TransportError::Ssh)?
            .success(),
        AuthMethod::PrivateKey { path, passphrase } => {
            let passphrase = passphrase.as_ref().map(|p| p.expose_secret());
            let key = load_secret_key(path, passphrase)
                .map_err(|e| TransportError::Key(e.to_string()))?;

            let hash_alg = session
                .best_supported_rsa_hash()
                .await
                .map_err(TransportError::Ssh)?
                .flatten();

            session
                .authenticate_publickey(
                    &config.username,
                    PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                )
                .await
                .map_err(TransportError::Ssh)?
                .success()
        }
    };

    if !success {
        return Err(TransportError::AuthenticationFailed {
            user: config.username.clone(),
        }
        .into());
    }

    Ok(())
}

#[derive(Debug, Clone)]
enum ChannelRequest {
    Shell,
    Exec(String),
    Subsystem(&'static str),
}

impl ChannelRequest {
    fn kind(&self) -> ChannelKind {
        match self {
            ChannelRequest::Shell => ChannelKind::Shell,
            ChannelRequest::Exec(_) => ChannelKind::Command,
            ChannelRequest::Subsystem(_) => ChannelKind::Sftp,
        }
    }
}

/// Session channel on an [`SshTransport`].
///
/// Output is pumped into the assigned sinks by a tokio task spawned in
/// `connect`; the same task writes queued input to the remote side.
pub struct SshChannel {
    id: u32,
    session: Arc<Handle<SshHandler>>,
    request: ChannelRequest,
    pty: Option<(u32, u32)>,
    stdout: Option<Box<dyn OutputSink>>,
    stderr: Option<Box<dyn OutputSink>>,
    input: InputSink,
    input_rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    state: Arc<ChannelState>,
    shutdown: Arc<Notify>,
    task: Option<JoinHandle<()>>,
}

impl SshChannel {
    /// Open a session channel and issue its requests. Takes owned parts;
    /// `SshChannel` is not `Sync`.
    async fn open(
        session: Arc<Handle<SshHandler>>,
        request: ChannelRequest,
        pty: Option<(u32, u32)>,
    ) -> Result<Channel<Msg>> {
        let channel = session
            .channel_open_session()
            .await
            .map_err(ChannelError::OpenFailed)?;

        if let Some((width, height)) = pty {
            channel
                .request_pty(true, "xterm", width, height, 0, 0, &[])
                .await
                .map_err(|source| ChannelError::RequestFailed {
                    request: "pty-req",
                    source,
                })?;
        }

        match &request {
            ChannelRequest::Shell => channel
                .request_shell(true)
                .await
                .map_err(|source| ChannelError::RequestFailed {
                    request: "shell",
                    source,
                })?,
            ChannelRequest::Exec(command) => channel
                .exec(true, command.as_str())
                .await
                .map_err(|source| ChannelError::RequestFailed {
                    request: "exec",
                    source,
                })?,
            ChannelRequest::Subsystem(name) => channel
                .request_subsystem(true, *name)
                .await
                .map_err(|source| ChannelError::RequestFailed {
                    request: "subsystem",
                    source,
                })?,
        }

        Ok(channel)
    }
}

impl RemoteChannel for SshChannel {
    fn id(&self) -> u32 {
        self.id
    }

    fn kind(&self) -> ChannelKind {
        self.request.kind()
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
        if self.task.is_some() {
            return Err(ChannelError::AlreadyConnected(self.id).into());
        }
        let channel =
            Self::open(self.session.clone(), self.request.clone(), self.pty).await?;

        let input_rx = self
            .input_rx
            .take()
            .ok_or(ChannelError::AlreadyConnected(self.id))?;
        let stdout = self.stdout.take().unwrap_or_else(|| Box::new(DiscardSink));
        let stderr = self.stderr.take().unwrap_or_else(|| Box::new(DiscardSink));

        trace!("channel #{}: connected ({:?})", self.id, self.kind());
        self.task = Some(tokio::spawn(pump(
            self.id,
            channel,
            stdout,
            stderr,
            input_rx,
            self.state.clone(),
            self.shutdown.clone(),
        )));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some(task) = self.task.take() else {
            return Ok(());
        };
        self.shutdown.notify_one();
        if let Err(e) = task.await {
            warn!("channel #{}: delivery task failed: {}", self.id, e);
        }
        trace!("channel #{}: disconnected", self.id);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn exit_status(&self) -> Option<i32> {
        self.state.exit_status()
    }
}

/// Deliver channel messages to the sinks and queued input to the channel
/// until the remote side closes or a disconnect is requested.
async fn pump(
    id: u32,
    channel: Channel<Msg>,
    mut stdout: Box<dyn OutputSink>,
    mut stderr: Box<dyn OutputSink>,
    mut input_rx: mpsc::UnboundedReceiver<Bytes>,
    state: Arc<ChannelState>,
    shutdown: Arc<Notify>,
) {
    let mut channel = channel;
    loop {
        tokio::select! {
            msg = channel.wait() => match msg {
                Some(ChannelMsg::Data { data }) => stdout.write(&data),
                Some(ChannelMsg::ExtendedData { data, ext: 1 }) => stderr.write(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => {
                    trace!("channel #{}: exit status {}", id, exit_status);
                    state.set_exit_status(exit_status as i32);
                }
                Some(ChannelMsg::ExitSignal { signal_name, .. }) => {
                    debug!("channel #{}: terminated by signal {:?}", id, signal_name);
                }
                Some(ChannelMsg::Close) | None => break,
                Some(_) => {}
            },
            Some(chunk) = input_rx.recv() => {
                if let Err(e) = channel.data(chunk.as_ref()).await {
                    warn!("channel #{}: failed to write input: {}", id, e);
                }
            }
            _ = shutdown.notified() => {
                if let Err(e) = channel.close().await {
                    debug!("channel #{}: close failed: {}", id, e);
                }
                break;
            }
        }
    }

    stdout.close();
    stderr.close();
    state.mark_closed();
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Detailed host key error surfaced by `SshTransport::connect`.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// `Ok(true)` if known and matching, `Ok(false)` if unknown.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path),
            None => russh::keys::check_known_hosts(&self.host, self.port, pubkey),
        };

        result.map_err(|e| match e {
            russh::keys::Error::KeyChanged { line } => TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            },
            other => TransportError::KnownHosts(other.to_string()),
        })
    }

    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = match &self.known_hosts_path {
            Some(path) => {
                russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
            }
            None => russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey),
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        *self
            .host_key_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(error);
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        let accepted = match self.host_key_verification {
            HostKeyVerification::Disabled => true,
            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    true
                }
                Err(e) => self.reject(e),
            },
            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => true,
                Ok(false) => self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                }),
                Err(e) => self.reject(e),
            },
        };
        Ok(accepted)
    }
}

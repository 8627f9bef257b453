//! Per-host transport client
//!
//! [`SshClient`] owns the session lifecycle for one host:
//!
//! ```text
//! Disconnected ──connect──▶ Connecting ──ok──▶ Connected
//!      ▲                        │                  │
//!      └────────── error ───────┘     disconnect / session lost
//! ```
//!
//! All operations on one client go through a single async mutex, so at most
//! one command is in flight per session.
//!
//! A client that serves as a bastion additionally hands out a shared
//! [`Gateway`]. Tunneled clients take a reference on it while connected and
//! release it on disconnect; the gateway shuts down with the last release.

use crate::command::{CommandResult, ExecOptions, RemoteCommand};
use crate::env::{script_command, shell_escape};
use crate::error::{Result, SshError};
use crate::file::RemoteFile;
use crate::retry::{ErrorClass, RetryPolicy};
use crate::session::{ConnectOptions, Connector, Gateway, LocalBind, PortForward, Session, Target};
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tracing::{Instrument, Span};

/// Connection state of a client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
            ConnectionStatus::Connecting => write!(f, "connecting"),
            ConnectionStatus::Connected => write!(f, "connected"),
        }
    }
}

#[derive(Default)]
struct ClientState {
    session: Option<Box<dyn Session>>,
    /// Reference held on the bastion's gateway
    gateway: Option<Arc<dyn Gateway>>,
}

impl ClientState {
    fn is_connected(&self) -> bool {
        self.session.as_ref().is_some_and(|s| !s.is_closed())
    }
}

#[derive(Default)]
struct GatewayState {
    gateway: Option<Arc<dyn Gateway>>,
    dependents: usize,
}

fn classify(err: &SshError) -> ErrorClass {
    ErrorClass::from_retryable(err.is_transient())
}

/// Transport client for one host
pub struct SshClient {
    target: Target,
    connector: Arc<dyn Connector>,
    bastion: Option<Arc<SshClient>>,
    retry: RetryPolicy,
    connect_timeout: Option<Duration>,
    require_timeout: Duration,
    span: Span,
    status: watch::Sender<ConnectionStatus>,
    state: Mutex<ClientState>,
    gateway: Mutex<GatewayState>,
}

impl SshClient {
    pub fn new(target: Target, connector: Arc<dyn Connector>) -> Self {
        let span = tracing::info_span!("ssh", host = %target.address);
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            target,
            connector,
            bastion: None,
            retry: RetryPolicy::default(),
            connect_timeout: None,
            require_timeout: Duration::from_secs(3),
            span,
            status,
            state: Mutex::new(ClientState::default()),
            gateway: Mutex::new(GatewayState::default()),
        }
    }

    /// Tunnel sessions through the gateway of `bastion`
    pub fn with_bastion(mut self, bastion: Arc<SshClient>) -> Self {
        self.bastion = Some(bastion);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Timeout for the implicit connect before a command
    pub fn with_require_timeout(mut self, timeout: Duration) -> Self {
        self.require_timeout = timeout;
        self
    }

    /// Span every event of this client is recorded under
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn bastion(&self) -> Option<&Arc<SshClient>> {
        self.bastion.as_ref()
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }

    /// Watch status transitions
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.state.lock().await.is_connected()
    }

    /// Open the session, retrying transient failures
    pub async fn connect(&self, options: ConnectOptions) -> Result<()> {
        async {
            let mut state = self.state.lock().await;
            self.connect_locked(&mut state, &options).await
        }
        .instrument(self.span.clone())
        .await
    }

    async fn connect_locked(&self, state: &mut ClientState, options: &ConnectOptions) -> Result<()> {
        if state.is_connected() {
            return Ok(());
        }
        // A session that closed underneath us is discarded, not reused.
        if let Some(stale) = state.session.take() {
            if let Err(err) = stale.close().await {
                tracing::debug!("error closing stale session: {}", err);
            }
        }
        self.status.send_replace(ConnectionStatus::Connecting);

        let options = ConnectOptions {
            timeout: options.timeout.or(self.connect_timeout),
        };

        let mut acquired = false;
        let cached = state.gateway.as_ref().filter(|g| g.is_active()).cloned();
        let gateway = match &self.bastion {
            Some(bastion) => match cached {
                Some(gateway) => Some(gateway),
                None => match self.reacquire_gateway(bastion, state, &options).await {
                    Ok(gateway) => {
                        acquired = true;
                        Some(gateway)
                    }
                    Err(err) => {
                        self.status.send_replace(ConnectionStatus::Disconnected);
                        return Err(err);
                    }
                },
            },
            None => None,
        };

        let result = self
            .retry
            .perform(classify, |attempt| {
                let gateway = gateway.clone();
                let options = &options;
                async move {
                    tracing::debug!("connect: {} (attempt {})", self.target, attempt);
                    let connect = self.connector.connect(&self.target, options, gateway);
                    match options.timeout {
                        Some(timeout) => tokio::time::timeout(timeout, connect)
                            .await
                            .map_err(|_| {
                                SshError::Timeout(format!("{} after {:?}", self.target, timeout))
                            })?,
                        None => connect.await,
                    }
                }
            })
            .await;

        match result {
            Ok(session) => {
                state.session = Some(session);
                self.status.send_replace(ConnectionStatus::Connected);
                tracing::debug!("connected to {}", self.target);
                Ok(())
            }
            Err(err) => {
                if acquired {
                    state.gateway = None;
                    if let Some(bastion) = &self.bastion {
                        bastion.release_gateway().await;
                    }
                }
                self.status.send_replace(ConnectionStatus::Disconnected);
                Err(err)
            }
        }
    }

    /// Drop a dead gateway reference, if any, and take one on a live gateway
    async fn reacquire_gateway(
        &self,
        bastion: &SshClient,
        state: &mut ClientState,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Gateway>> {
        if state.gateway.take().is_some() {
            tracing::info!("gateway via {} lost, reopening", bastion.target);
            bastion.release_gateway().await;
        }
        let gateway = bastion.acquire_gateway(options).await?;
        state.gateway = Some(gateway.clone());
        Ok(gateway)
    }

    /// Connect with a short timeout if needed
    ///
    /// Transient failures surface as [`SshError::NotConnected`] so callers can
    /// tell a dead transport from a failed command.
    async fn require_session(&self, state: &mut ClientState) -> Result<()> {
        if state.is_connected() {
            return Ok(());
        }
        let options = ConnectOptions::with_timeout(self.require_timeout);
        match self.connect_locked(state, &options).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() => Err(SshError::NotConnected {
                host: self.target.address.clone(),
                source: Box::new(err),
            }),
            Err(err) => Err(err),
        }
    }

    fn not_connected(&self, reason: &str) -> SshError {
        SshError::NotConnected {
            host: self.target.address.clone(),
            source: Box::new(SshError::Disconnected(reason.to_string())),
        }
    }

    /// Run a command and return its result, whatever the exit status
    pub async fn exec(&self, cmd: &str, options: ExecOptions) -> Result<CommandResult> {
        async {
            let mut state = self.state.lock().await;
            self.require_session(&mut state).await?;

            let result = match state.session.as_deref() {
                Some(session) => {
                    RemoteCommand::new(session, &self.target.address, cmd, options)
                        .run()
                        .await
                }
                None => return Err(self.not_connected("no session")),
            };

            if let Err(err) = &result {
                if err.is_transient() {
                    tracing::debug!("session lost: {}", err);
                    if let Some(session) = state.session.take() {
                        if let Err(err) = session.close().await {
                            tracing::warn!("error closing lost session: {}", err);
                        }
                    }
                    self.status.send_replace(ConnectionStatus::Disconnected);
                }
            }
            result
        }
        .instrument(self.span.clone())
        .await
    }

    /// Run a command and return stdout, failing on a non-zero exit status
    pub async fn exec_or_fail(&self, cmd: &str, options: ExecOptions) -> Result<String> {
        let result = self.exec(cmd, options).await?;
        Ok(result.into_checked(&self.target.address)?.stdout)
    }

    /// Whether a command exits with status 0
    pub async fn exec_bool(&self, cmd: &str, options: ExecOptions) -> Result<bool> {
        Ok(self.exec(cmd, options).await?.success())
    }

    /// Run a local script file on the host with a clean environment
    ///
    /// The script is read from `path`, or from `name` when no path is given,
    /// and piped into `bash -s`.
    pub async fn exec_script(
        &self,
        name: &str,
        env: &[(String, String)],
        path: Option<&Path>,
    ) -> Result<String> {
        let path = path.unwrap_or_else(|| Path::new(name));
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| SshError::Script {
                path: path.to_path_buf(),
                source,
            })?;
        self.exec_script_source(name, &source, env).await
    }

    /// Like [`SshClient::exec_script`] for a script already in memory
    pub async fn exec_script_source(
        &self,
        name: &str,
        source: &str,
        env: &[(String, String)],
    ) -> Result<String> {
        let cmd = script_command(env);
        self.exec_or_fail(
            &cmd,
            ExecOptions::default().with_stdin(source).with_source(name),
        )
        .await
    }

    pub fn file(&self, path: impl Into<String>) -> RemoteFile<'_> {
        RemoteFile::new(self, path)
    }

    /// Create a remote temp file for the duration of `f`
    ///
    /// The file is removed after `f` returns, including when it fails.
    pub async fn with_tempfile<'a, T, E, F, Fut>(
        &'a self,
        prefix: &str,
        content: Option<&str>,
        f: F,
    ) -> std::result::Result<T, E>
    where
        F: FnOnce(RemoteFile<'a>) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<SshError>,
    {
        let path = self
            .exec_or_fail(
                &format!("mktemp -t {}", shell_escape(&format!("{}.XXXXXX", prefix))),
                ExecOptions::default(),
            )
            .await?
            .trim()
            .to_string();

        let result = match content {
            Some(content) => match self.file(path.clone()).write(content).await {
                Ok(()) => f(self.file(path.clone())).await,
                Err(err) => Err(err.into()),
            },
            None => f(self.file(path.clone())).await,
        };

        if let Err(err) = self.file(path.clone()).unlink().await {
            tracing::warn!(parent: &self.span, "failed to remove {}: {}", path, err);
        }
        result
    }

    /// Forward a local port to `remote_host:remote_port` through the session
    pub async fn forward_port(
        &self,
        remote_host: &str,
        remote_port: u16,
        bind: LocalBind,
    ) -> Result<Box<dyn PortForward>> {
        async {
            let mut state = self.state.lock().await;
            self.require_session(&mut state).await?;
            let session = state
                .session
                .as_deref()
                .ok_or_else(|| self.not_connected("no session"))?;
            let forward = session.forward(remote_host, remote_port, &bind).await?;
            tracing::debug!(
                "forwarding {} -> {}:{}",
                forward.local_address(),
                remote_host,
                remote_port
            );
            Ok(forward)
        }
        .instrument(self.span.clone())
        .await
    }

    /// Close the session
    ///
    /// Safe to call any number of times. Local state is cleared even when the
    /// remote close fails.
    pub async fn disconnect(&self) {
        async {
            let mut state = self.state.lock().await;

            if let Some(session) = state.session.take() {
                if let Err(err) = session.close().await {
                    tracing::warn!("error closing session: {}", err);
                }
                tracing::debug!("disconnected");
            }

            if state.gateway.take().is_some() {
                if let Some(bastion) = &self.bastion {
                    bastion.release_gateway().await;
                }
            }

            let mut gateway = self.gateway.lock().await;
            if gateway.dependents == 0 {
                self.shutdown_gateway(&mut gateway).await;
            }

            self.status.send_replace(ConnectionStatus::Disconnected);
        }
        .instrument(self.span.clone())
        .await
    }

    async fn acquire_gateway(&self, options: &ConnectOptions) -> Result<Arc<dyn Gateway>> {
        let mut state = self.gateway.lock().await;

        let gateway = match &state.gateway {
            Some(gateway) if gateway.is_active() => gateway.clone(),
            _ => {
                // Dependents still holding a dead gateway move to the new one
                // when they reconnect.
                self.shutdown_gateway(&mut state).await;
                let gateway = self
                    .retry
                    .perform(classify, |_| self.connector.open_gateway(&self.target, options))
                    .instrument(self.span.clone())
                    .await?;
                tracing::info!(parent: &self.span, "gateway established");
                state.gateway = Some(gateway.clone());
                gateway
            }
        };

        state.dependents += 1;
        Ok(gateway)
    }

    async fn release_gateway(&self) {
        let mut state = self.gateway.lock().await;
        state.dependents = state.dependents.saturating_sub(1);
        if state.dependents == 0 {
            self.shutdown_gateway(&mut state).await;
        }
    }

    async fn shutdown_gateway(&self, state: &mut GatewayState) {
        if let Some(gateway) = state.gateway.take() {
            if let Err(err) = gateway.shutdown().await {
                tracing::warn!(parent: &self.span, "gateway shutdown failed: {}", err);
            } else {
                tracing::debug!(parent: &self.span, "gateway shut down");
            }
        }
    }

    /// Number of tunneled clients currently using this client's gateway
    pub async fn gateway_dependents(&self) -> usize {
        self.gateway.lock().await.dependents
    }

    pub async fn has_gateway(&self) -> bool {
        self.gateway.lock().await.gateway.is_some()
    }
}

impl std::fmt::Debug for SshClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SshClient")
            .field("target", &self.target)
            .field("status", &self.status())
            .field("bastion", &self.bastion.as_ref().map(|b| b.target.address.clone()))
            .finish()
    }
}

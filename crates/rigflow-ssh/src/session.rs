//! Transport seams
//!
//! A [`Connector`] knows how to open a [`Session`] to a [`Target`], either
//! directly or through a bastion [`Gateway`]. [`crate::SshClient`] drives the
//! lifecycle on top of these traits; backends only implement the primitives.

use crate::command::CommandResult;
use crate::error::Result;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    pub address: String,
    pub user: Option<String>,
    pub port: u16,
    pub ssh_key_path: Option<PathBuf>,
}

impl Target {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            user: None,
            port: 22,
            ssh_key_path: None,
        }
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_key_path = Some(path.into());
        self
    }

    /// `user@address`, or just the address without an explicit user
    pub fn destination(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.address),
            None => self.address.clone(),
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.destination())?;
        if self.port != 22 {
            write!(f, ":{}", self.port)?;
        }
        Ok(())
    }
}

/// Options for opening a session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    /// Connection establishment timeout
    pub timeout: Option<Duration>,
}

impl ConnectOptions {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
        }
    }
}

/// Local side of a port forward
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalBind {
    pub host: String,
    /// `None` picks a free port
    pub port: Option<u16>,
}

impl Default for LocalBind {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: None,
        }
    }
}

impl LocalBind {
    pub fn port(port: u16) -> Self {
        Self {
            port: Some(port),
            ..Default::default()
        }
    }
}

/// An open port forward. The caller closes it when done.
#[async_trait]
pub trait PortForward: Send + Sync {
    fn local_host(&self) -> &str;

    fn local_port(&self) -> u16;

    async fn close(&self) -> Result<()>;

    fn local_address(&self) -> String {
        format!("{}:{}", self.local_host(), self.local_port())
    }
}

/// One live connection to a host
#[async_trait]
pub trait Session: Send + Sync {
    /// Run `cmd` to completion, piping `stdin` if given
    ///
    /// A non-zero exit is a successful call; only transport failures are
    /// errors.
    async fn exec(&self, cmd: &str, stdin: Option<&str>) -> Result<CommandResult>;

    async fn forward(
        &self,
        remote_host: &str,
        remote_port: u16,
        bind: &LocalBind,
    ) -> Result<Box<dyn PortForward>>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// A long-lived tunnel endpoint on a bastion host
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Command that yields a stdio tunnel to `%h:%p` through this gateway
    fn proxy_command(&self) -> String;

    fn is_active(&self) -> bool;

    async fn shutdown(&self) -> Result<()>;
}

/// Opens sessions and gateways for a backend
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        target: &Target,
        options: &ConnectOptions,
        gateway: Option<Arc<dyn Gateway>>,
    ) -> Result<Box<dyn Session>>;

    async fn open_gateway(
        &self,
        target: &Target,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Gateway>>;
}

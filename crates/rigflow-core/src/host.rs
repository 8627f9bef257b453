//! Hosts and bastions
//!
//! A [`Host`] pairs a static [`HostConfig`] with a transport client that is
//! built on first use. Hosts behind a jump host hold a reference to a shared
//! [`Bastion`], whose own host exists only to provide the gateway.

use rigflow_config::{BastionConfig, HostConfig, Role, TransportSettings};
use rigflow_ssh::{Connector, RetryPolicy, SshClient, Target};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use tracing::Span;

/// A cluster host
pub struct Host {
    config: HostConfig,
    connector: Arc<dyn Connector>,
    settings: TransportSettings,
    bastion: Option<Arc<Bastion>>,
    span: Span,
    transport: OnceLock<Arc<SshClient>>,
}

impl Host {
    pub fn new(config: HostConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            settings: TransportSettings::default(),
            bastion: None,
            span: Span::none(),
            transport: OnceLock::new(),
        }
    }

    pub fn with_settings(mut self, settings: TransportSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_bastion(mut self, bastion: Arc<Bastion>) -> Self {
        self.bastion = Some(bastion);
        self
    }

    /// Parent span for the transport's `ssh` span
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Node name as known to Kubernetes
    pub fn hostname(&self) -> &str {
        self.config.hostname.as_deref().unwrap_or(&self.config.address)
    }

    /// Address the API server listens on
    pub fn api_address(&self) -> &str {
        self.config
            .private_address
            .as_deref()
            .unwrap_or(&self.config.address)
    }

    pub fn role(&self) -> Role {
        self.config.role
    }

    pub fn is_master(&self) -> bool {
        self.config.is_master()
    }

    pub fn is_worker(&self) -> bool {
        self.config.is_worker()
    }

    pub fn is_local(&self) -> bool {
        self.config.local
    }

    pub fn labels(&self) -> &HashMap<String, String> {
        &self.config.labels
    }

    pub fn bastion(&self) -> Option<&Arc<Bastion>> {
        self.bastion.as_ref()
    }

    /// The host's transport client, built on first call
    pub fn transport(&self) -> &Arc<SshClient> {
        self.transport.get_or_init(|| self.build_transport())
    }

    /// Disconnect the transport if it was ever built
    pub async fn disconnect(&self) {
        if let Some(transport) = self.transport.get() {
            transport.disconnect().await;
        }
    }

    fn target(&self) -> Target {
        let mut target = Target::new(&self.config.address).with_port(self.config.ssh_port);
        if let Some(user) = &self.config.user {
            target = target.with_user(user);
        }
        if let Some(key) = self.config.ssh_key_path() {
            target = target.with_key(key);
        }
        target
    }

    fn build_transport(&self) -> Arc<SshClient> {
        let span = tracing::info_span!(parent: &self.span, "ssh", host = %self.config.address);
        let mut client = SshClient::new(self.target(), self.connector.clone())
            .with_retry(RetryPolicy::new(
                self.settings.connect_attempts,
                self.settings.connect_retry_delay(),
            ))
            .with_connect_timeout(self.settings.connect_timeout())
            .with_require_timeout(self.settings.require_timeout())
            .with_span(span);

        if let Some(bastion) = &self.bastion {
            client = client.with_bastion(bastion.host().transport().clone());
        }
        Arc::new(client)
    }

    fn key_path(&self) -> Option<PathBuf> {
        self.config.ssh_key_path()
    }
}

/// Hosts are the same machine when address, user and key match
impl PartialEq for Host {
    fn eq(&self, other: &Self) -> bool {
        self.config.address == other.config.address
            && self.config.user == other.config.user
            && self.key_path() == other.key_path()
    }
}

impl Eq for Host {}

impl std::fmt::Display for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.config.address)
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("address", &self.config.address)
            .field("role", &self.config.role)
            .field("local", &self.config.local)
            .field("bastion", &self.bastion.as_ref().map(|b| b.address()))
            .finish()
    }
}

/// A jump host
///
/// Owns one [`Host`] that is used only as a gateway. A bastion is never a
/// phase target.
pub struct Bastion {
    config: BastionConfig,
    host: Arc<Host>,
}

impl Bastion {
    pub fn new(config: BastionConfig, connector: Arc<dyn Connector>) -> Self {
        Self::from_host(config.clone(), |host| Host::new(host, connector))
    }

    pub(crate) fn from_host(
        config: BastionConfig,
        build: impl FnOnce(HostConfig) -> Host,
    ) -> Self {
        let mut host = HostConfig::new(&config.address).with_user(&config.user);
        host.ssh_key_path = Some(config.ssh_key_path.clone());
        Self {
            host: Arc::new(build(host)),
            config,
        }
    }

    pub fn config(&self) -> &BastionConfig {
        &self.config
    }

    pub fn address(&self) -> &str {
        &self.config.address
    }

    /// Gateway host
    pub fn host(&self) -> &Arc<Host> {
        &self.host
    }
}

impl PartialEq for Bastion {
    fn eq(&self, other: &Self) -> bool {
        self.config == other.config
    }
}

impl std::fmt::Debug for Bastion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bastion")
            .field("address", &self.config.address)
            .field("user", &self.config.user)
            .finish()
    }
}

//! Cluster file model

use crate::error::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Host role within the cluster
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Master,
    Worker,
    #[default]
    Unset,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Master => write!(f, "master"),
            Role::Worker => write!(f, "worker"),
            Role::Unset => write!(f, "unset"),
        }
    }
}

/// Jump host used to reach otherwise unreachable hosts
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BastionConfig {
    pub address: String,
    pub user: String,
    pub ssh_key_path: String,
}

impl BastionConfig {
    pub fn ssh_key_path(&self) -> PathBuf {
        expand_home(&self.ssh_key_path)
    }
}

/// A single cluster host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostConfig {
    pub address: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_address: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ssh_key_path: Option<String>,

    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default)]
    pub role: Role,

    #[serde(default)]
    pub labels: HashMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bastion: Option<BastionConfig>,

    /// Loopback host; commands run without a network transport
    #[serde(default)]
    pub local: bool,
}

fn default_ssh_port() -> u16 {
    22
}

impl HostConfig {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            private_address: None,
            hostname: None,
            user: None,
            ssh_key_path: None,
            ssh_port: default_ssh_port(),
            role: Role::Unset,
            labels: HashMap::new(),
            bastion: None,
            local: false,
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.role = role;
        self
    }

    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn with_bastion(mut self, bastion: BastionConfig) -> Self {
        self.bastion = Some(bastion);
        self
    }

    pub fn with_hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = Some(hostname.into());
        self
    }

    pub fn local(mut self) -> Self {
        self.local = true;
        self
    }

    /// Key path with a leading `~/` expanded
    pub fn ssh_key_path(&self) -> Option<PathBuf> {
        self.ssh_key_path.as_deref().map(expand_home)
    }

    pub fn is_master(&self) -> bool {
        self.role == Role::Master
    }

    pub fn is_worker(&self) -> bool {
        self.role == Role::Worker
    }
}

/// Connection tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub connect_attempts: u32,
    pub connect_retry_delay_ms: u64,
    pub connect_timeout_secs: Option<u64>,
    /// Timeout used when a command finds the client disconnected
    pub require_timeout_secs: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            connect_attempts: 10,
            connect_retry_delay_ms: 1000,
            connect_timeout_secs: None,
            require_timeout_secs: 3,
        }
    }
}

impl TransportSettings {
    pub fn connect_retry_delay(&self) -> Duration {
        Duration::from_millis(self.connect_retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }

    pub fn require_timeout(&self) -> Duration {
        Duration::from_secs(self.require_timeout_secs)
    }
}

/// Drain / reboot tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceSettings {
    pub reboot_settle_secs: u64,
    pub reconnect_attempts: u32,
    pub reconnect_delay_ms: u64,
    pub uncordon_poll_ms: u64,
    pub drain_timeout: String,
}

impl Default for MaintenanceSettings {
    fn default() -> Self {
        Self {
            reboot_settle_secs: 20,
            reconnect_attempts: 60,
            reconnect_delay_ms: 5000,
            uncordon_poll_ms: 500,
            drain_timeout: "5m".to_string(),
        }
    }
}

/// Dispatch tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestrationSettings {
    /// Upper bound on hosts processed at once under parallel dispatch
    pub max_parallel: usize,
}

impl Default for OrchestrationSettings {
    fn default() -> Self {
        Self { max_parallel: 10 }
    }
}

/// Whole cluster file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub hosts: Vec<HostConfig>,

    #[serde(default)]
    pub transport: TransportSettings,

    #[serde(default)]
    pub maintenance: MaintenanceSettings,

    #[serde(default)]
    pub orchestration: OrchestrationSettings,

    /// Sections owned by other layers (network, container runtime, ...)
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl ClusterConfig {
    pub fn new(hosts: Vec<HostConfig>) -> Self {
        Self {
            hosts,
            ..Default::default()
        }
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn master_hosts(&self) -> Vec<&HostConfig> {
        self.hosts.iter().filter(|h| h.is_master()).collect()
    }

    pub fn worker_hosts(&self) -> Vec<&HostConfig> {
        self.hosts.iter().filter(|h| h.is_worker()).collect()
    }

    /// Primary master: the first master listed
    pub fn master_host(&self) -> Option<&HostConfig> {
        self.hosts.iter().find(|h| h.is_master())
    }

    pub fn section(&self, name: &str) -> Option<&serde_yaml::Value> {
        self.extra.get(name)
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

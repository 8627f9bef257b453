//! Phase abstraction
//!
//! A phase is one step of cluster setup or maintenance. Each phase type
//! declares a title and a [`HostSelector`]; the orchestrator builds one
//! instance per target host and awaits [`Phase::call`] on it.

use crate::context::ClusterContext;
use crate::error::{ClusterError, Result};
use crate::host::Host;
use crate::kube::{KUBE_CLIENT_KEY, KubeClient};
use async_trait::async_trait;
use rigflow_config::{ClusterConfig, MaintenanceSettings};
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

/// Which hosts a phase runs on by default
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostSelector {
    /// First master in the configuration
    PrimaryMaster,
    AllMasters,
    AllHosts,
    /// Hosts by address or hostname
    Explicit(Vec<String>),
}

impl HostSelector {
    /// Resolve against the cluster's hosts, keeping configuration order
    pub fn resolve(&self, hosts: &[Arc<Host>]) -> Result<Vec<Arc<Host>>> {
        match self {
            HostSelector::PrimaryMaster => {
                Ok(hosts.iter().find(|h| h.is_master()).cloned().into_iter().collect())
            }
            HostSelector::AllMasters => {
                Ok(hosts.iter().filter(|h| h.is_master()).cloned().collect())
            }
            HostSelector::AllHosts => Ok(hosts.to_vec()),
            HostSelector::Explicit(names) => names
                .iter()
                .map(|name| {
                    hosts
                        .iter()
                        .find(|h| h.address() == name || h.hostname() == name)
                        .cloned()
                        .ok_or_else(|| ClusterError::UnknownHost(name.clone()))
                })
                .collect(),
        }
    }
}

/// A unit of work bound to one host
#[async_trait]
pub trait Phase: Send + Sync + Sized + 'static {
    /// Human-readable title
    const TITLE: &'static str;

    /// Hosts used when the caller does not pass an explicit list
    fn hosts() -> HostSelector {
        HostSelector::AllHosts
    }

    fn new(host: Arc<Host>, ctx: PhaseContext) -> Self;

    async fn call(&self) -> anyhow::Result<()>;
}

/// What a phase instance sees of the run
#[derive(Clone)]
pub struct PhaseContext {
    context: ClusterContext,
    config: Arc<ClusterConfig>,
    hosts: Arc<Vec<Arc<Host>>>,
    lock: Arc<Mutex<()>>,
    title: &'static str,
}

impl PhaseContext {
    pub(crate) fn new(
        context: ClusterContext,
        config: Arc<ClusterConfig>,
        hosts: Arc<Vec<Arc<Host>>>,
        lock: Arc<Mutex<()>>,
        title: &'static str,
    ) -> Self {
        Self {
            context,
            config,
            hosts,
            lock,
            title,
        }
    }

    pub fn context(&self) -> &ClusterContext {
        &self.context
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn maintenance(&self) -> &MaintenanceSettings {
        &self.config.maintenance
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    /// Primary master
    pub fn master_host(&self) -> Result<Arc<Host>> {
        self.hosts
            .iter()
            .find(|h| h.is_master())
            .cloned()
            .ok_or(ClusterError::NoMasterHost)
    }

    /// Lock shared by every instance of this phase type
    pub async fn lock(&self) -> MutexGuard<'_, ()> {
        self.lock.lock().await
    }

    /// Kube client configured earlier in the run
    pub async fn kube_client(&self) -> Result<Arc<KubeClient>> {
        self.context
            .get::<KubeClient>(KUBE_CLIENT_KEY)
            .await
            .ok_or_else(|| ClusterError::MissingContext {
                phase: self.title,
                key: KUBE_CLIENT_KEY.to_string(),
            })
    }
}

impl std::fmt::Debug for PhaseContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhaseContext")
            .field("phase", &self.title)
            .field("hosts", &self.hosts.len())
            .finish()
    }
}

/// Per-phase-type locks
///
/// Filled when the orchestrator is built; lookups never create entries.
#[derive(Debug, Default)]
pub struct PhaseLocks {
    locks: HashMap<TypeId, Arc<Mutex<()>>>,
}

impl PhaseLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: Phase>(&mut self) {
        self.locks
            .entry(TypeId::of::<P>())
            .or_insert_with(|| Arc::new(Mutex::new(())));
    }

    pub fn is_registered<P: Phase>(&self) -> bool {
        self.locks.contains_key(&TypeId::of::<P>())
    }

    pub fn get<P: Phase>(&self) -> Result<Arc<Mutex<()>>> {
        self.locks
            .get(&TypeId::of::<P>())
            .cloned()
            .ok_or(ClusterError::PhaseNotRegistered(P::TITLE))
    }
}

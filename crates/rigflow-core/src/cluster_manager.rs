//! Phase orchestration
//!
//! [`ClusterManager`] owns the hosts, bastions and shared context of one run
//! and dispatches phases across hosts.
//!
//! - Serial dispatch walks hosts in order and stops at the first failure.
//! - Parallel dispatch runs one task per host under a concurrency ceiling,
//!   waits for all of them and reports every failure together.

use crate::context::ClusterContext;
use crate::error::{ClusterError, HostFailure, Result};
use crate::host::{Bastion, Host};
use crate::kube::{KUBE_CLIENT_KEY, KubeClient};
use crate::phase::{Phase, PhaseContext, PhaseLocks};
use crate::phases::{ConfigureClient, ConnectSsh, Drain, RebootHost};
use futures_util::future::join_all;
use rigflow_config::ClusterConfig;
use rigflow_ssh::{Connector, LocalConnector, OpenSshConnector};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, Span};

/// Builder for [`ClusterManager`]
pub struct ClusterManagerBuilder {
    config: ClusterConfig,
    connector: Option<Arc<dyn Connector>>,
    local_connector: Option<Arc<dyn Connector>>,
    span: Option<Span>,
    max_parallel: Option<usize>,
}

impl ClusterManagerBuilder {
    /// Connector for remote hosts and bastions (default: OpenSSH)
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Connector for hosts marked `local` (default: `sh -c`)
    pub fn local_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.local_connector = Some(connector);
        self
    }

    /// Run span every host and phase span is parented to
    pub fn span(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }

    /// Override `orchestration.max_parallel`
    pub fn max_parallel(mut self, max_parallel: usize) -> Self {
        self.max_parallel = Some(max_parallel);
        self
    }

    pub fn build(self) -> ClusterManager {
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(OpenSshConnector::new()));
        let local_connector = self
            .local_connector
            .unwrap_or_else(|| Arc::new(LocalConnector::new()));
        let span = self
            .span
            .unwrap_or_else(|| tracing::info_span!("cluster"));
        let max_parallel = self
            .max_parallel
            .unwrap_or(self.config.orchestration.max_parallel)
            .max(1);
        let settings = &self.config.transport;

        let mut bastions: Vec<Arc<Bastion>> = Vec::new();
        let mut hosts = Vec::with_capacity(self.config.hosts.len());

        for config in &self.config.hosts {
            let bastion = config.bastion.as_ref().map(|bastion_config| {
                match bastions.iter().find(|b| b.config() == bastion_config) {
                    Some(existing) => existing.clone(),
                    None => {
                        let bastion = Arc::new(Bastion::from_host(bastion_config.clone(), |host| {
                            Host::new(host, connector.clone())
                                .with_settings(settings.clone())
                                .with_span(span.clone())
                        }));
                        bastions.push(bastion.clone());
                        bastion
                    }
                }
            });

            let host_connector = if config.local {
                local_connector.clone()
            } else {
                connector.clone()
            };
            let mut host = Host::new(config.clone(), host_connector)
                .with_settings(settings.clone())
                .with_span(span.clone());
            if let Some(bastion) = bastion {
                host = host.with_bastion(bastion);
            }
            hosts.push(Arc::new(host));
        }

        let mut locks = PhaseLocks::new();
        locks.register::<ConnectSsh>();
        locks.register::<Drain>();
        locks.register::<RebootHost>();
        locks.register::<ConfigureClient>();

        ClusterManager {
            config: Arc::new(self.config),
            hosts: Arc::new(hosts),
            bastions,
            context: ClusterContext::new(),
            locks,
            max_parallel,
            span,
        }
    }
}

/// Runs phases across the cluster
pub struct ClusterManager {
    config: Arc<ClusterConfig>,
    hosts: Arc<Vec<Arc<Host>>>,
    bastions: Vec<Arc<Bastion>>,
    context: ClusterContext,
    locks: PhaseLocks,
    max_parallel: usize,
    span: Span,
}

impl ClusterManager {
    pub fn new(config: ClusterConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClusterConfig) -> ClusterManagerBuilder {
        ClusterManagerBuilder {
            config,
            connector: None,
            local_connector: None,
            span: None,
            max_parallel: None,
        }
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub fn hosts(&self) -> &[Arc<Host>] {
        &self.hosts
    }

    pub fn bastions(&self) -> &[Arc<Bastion>] {
        &self.bastions
    }

    /// Shared context of this run
    pub fn context(&self) -> &ClusterContext {
        &self.context
    }

    pub fn master_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.iter().filter(|h| h.is_master()).cloned().collect()
    }

    pub fn worker_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.iter().filter(|h| h.is_worker()).cloned().collect()
    }

    /// Look a host up by address or hostname
    pub fn host(&self, name: &str) -> Result<Arc<Host>> {
        self.hosts
            .iter()
            .find(|h| h.address() == name || h.hostname() == name)
            .cloned()
            .ok_or_else(|| ClusterError::UnknownHost(name.to_string()))
    }

    /// Make a phase type available to [`ClusterManager::apply_phase`]
    pub fn register_phase<P: Phase>(&mut self) {
        self.locks.register::<P>();
    }

    /// Run `P` on `hosts`, or on the hosts its selector resolves to
    pub async fn apply_phase<P: Phase>(
        &self,
        hosts: Option<&[Arc<Host>]>,
        parallel: bool,
    ) -> Result<()> {
        self.apply_phase_with::<P, _>(hosts, parallel, P::new).await
    }

    /// Like [`ClusterManager::apply_phase`] with a custom constructor
    pub async fn apply_phase_with<P, F>(
        &self,
        hosts: Option<&[Arc<Host>]>,
        parallel: bool,
        build: F,
    ) -> Result<()>
    where
        P: Phase,
        F: Fn(Arc<Host>, PhaseContext) -> P + Send + Sync + 'static,
    {
        let ctx = self.phase_context::<P>()?;
        let hosts = match hosts {
            Some(hosts) => hosts.to_vec(),
            None => P::hosts().resolve(&self.hosts)?,
        };

        self.dispatch(P::TITLE, hosts, parallel, move |host| {
            let phase = build(host, ctx.clone());
            async move { phase.call().await }
        })
        .await
    }

    /// Drain and reboot each host in turn
    pub async fn apply_reboot_hosts(&self, hosts: &[Arc<Host>], parallel: bool) -> Result<()> {
        let drain = self.phase_context::<Drain>()?;
        let reboot = self.phase_context::<RebootHost>()?;

        self.dispatch("Reboot hosts", hosts.to_vec(), parallel, move |host| {
            let drain = Drain::new(host.clone(), drain.clone());
            let reboot = RebootHost::new(host, reboot.clone());
            async move {
                drain.call().await?;
                reboot.call().await
            }
        })
        .await
    }

    /// Open transports to every non-local host
    pub async fn connect_hosts(&self) -> Result<()> {
        let remote: Vec<_> = self.hosts.iter().filter(|h| !h.is_local()).cloned().collect();
        self.apply_phase::<ConnectSsh>(Some(remote.as_slice()), true).await
    }

    /// End the run: drop the context and close every transport
    ///
    /// Tunneled hosts go first so bastion gateways are released last.
    pub async fn disconnect(&self) {
        async {
            if let Some(client) = self.context.remove::<KubeClient>(KUBE_CLIENT_KEY).await {
                if let Err(err) = client.close().await {
                    tracing::warn!("failed to close kube client: {}", err);
                }
            }
            self.context.clear().await;

            join_all(self.hosts.iter().map(|host| host.disconnect())).await;
            for bastion in &self.bastions {
                bastion.host().disconnect().await;
            }
            tracing::debug!("disconnected all hosts");
        }
        .instrument(self.span.clone())
        .await
    }

    fn phase_context<P: Phase>(&self) -> Result<PhaseContext> {
        let lock = self.locks.get::<P>()?;
        Ok(PhaseContext::new(
            self.context.clone(),
            self.config.clone(),
            self.hosts.clone(),
            lock,
            P::TITLE,
        ))
    }

    fn phase_span(&self, title: &str, host: &Host) -> Span {
        tracing::info_span!(parent: &self.span, "phase", title = %title, host = %host)
    }

    async fn dispatch<J, Fut>(
        &self,
        title: &'static str,
        hosts: Vec<Arc<Host>>,
        parallel: bool,
        job: J,
    ) -> Result<()>
    where
        J: Fn(Arc<Host>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        if hosts.is_empty() {
            tracing::debug!(parent: &self.span, "{}: no hosts", title);
            return Ok(());
        }
        tracing::info!(
            parent: &self.span,
            "==> {} @ {}",
            title,
            hosts.iter().map(|h| h.address()).collect::<Vec<_>>().join(" ")
        );

        let failures = if parallel {
            self.dispatch_parallel(title, hosts, job).await
        } else {
            self.dispatch_serial(title, hosts, job).await
        };

        if failures.is_empty() {
            Ok(())
        } else {
            Err(ClusterError::PhaseFailed {
                phase: title.to_string(),
                failures,
            })
        }
    }

    async fn dispatch_serial<J, Fut>(
        &self,
        title: &'static str,
        hosts: Vec<Arc<Host>>,
        job: J,
    ) -> Vec<HostFailure>
    where
        J: Fn(Arc<Host>) -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        for host in hosts {
            let span = self.phase_span(title, &host);
            if let Err(error) = job(host.clone()).instrument(span.clone()).await {
                tracing::error!(parent: &span, "{:#}", error);
                return vec![HostFailure {
                    host: host.to_string(),
                    error,
                }];
            }
        }
        Vec::new()
    }

    async fn dispatch_parallel<J, Fut>(
        &self,
        title: &'static str,
        hosts: Vec<Arc<Host>>,
        job: J,
    ) -> Vec<HostFailure>
    where
        J: Fn(Arc<Host>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let job = Arc::new(job);
        let semaphore = Arc::new(Semaphore::new(self.max_parallel));

        let handles = hosts
            .iter()
            .map(|host| {
                let job = job.clone();
                let semaphore = semaphore.clone();
                let host = host.clone();
                let span = self.phase_span(title, &host);
                tokio::spawn(
                    async move {
                        let _permit = semaphore.acquire_owned().await?;
                        let result = job(host).await;
                        if let Err(error) = &result {
                            tracing::error!("{:#}", error);
                        }
                        result
                    }
                    .instrument(span),
                )
            })
            .collect::<Vec<_>>();

        join_all(handles)
            .await
            .into_iter()
            .zip(&hosts)
            .filter_map(|(joined, host)| {
                let error = match joined {
                    Ok(Ok(())) => return None,
                    Ok(Err(error)) => error,
                    Err(join_error) => anyhow::anyhow!("phase task aborted: {}", join_error),
                };
                Some(HostFailure {
                    host: host.to_string(),
                    error,
                })
            })
            .collect()
    }
}

impl std::fmt::Debug for ClusterManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterManager")
            .field("hosts", &self.hosts.len())
            .field("bastions", &self.bastions.len())
            .field("max_parallel", &self.max_parallel)
            .finish()
    }
}

use crate::host::Host;
use crate::kube::{API_PORT, KUBE_CLIENT_KEY, KubeClient};
use crate::phase::{HostSelector, Phase, PhaseContext};
use anyhow::Context;
use async_trait::async_trait;
use rigflow_ssh::LocalBind;
use std::sync::Arc;

/// Admin kubeconfig written by kubeadm on masters
pub const ADMIN_KUBECONFIG: &str = "/etc/kubernetes/admin.conf";

/// Build the run's kube client from the master's admin kubeconfig
///
/// The client is cached under [`KUBE_CLIENT_KEY`]. Running the phase again
/// closes the previous client's forward before a new one is opened.
pub struct ConfigureClient {
    host: Arc<Host>,
    ctx: PhaseContext,
    optional: bool,
}

impl ConfigureClient {
    /// Skip instead of failing when the kubeconfig does not exist yet
    pub fn optional(host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self {
            host,
            ctx,
            optional: true,
        }
    }
}

#[async_trait]
impl Phase for ConfigureClient {
    const TITLE: &'static str = "Configure kube client";

    fn hosts() -> HostSelector {
        HostSelector::PrimaryMaster
    }

    fn new(host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self {
            host,
            ctx,
            optional: false,
        }
    }

    async fn call(&self) -> anyhow::Result<()> {
        let transport = self.host.transport();
        let kubeconfig = transport.file(ADMIN_KUBECONFIG);

        if self.optional && !kubeconfig.exists().await? {
            tracing::debug!("{} not found, skipping", kubeconfig);
            return Ok(());
        }

        tracing::info!("fetching kubectl config");
        let content = kubeconfig.read().await?;
        let config: serde_yaml::Value = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid kubeconfig at {}", kubeconfig))?;
        let api_address = self.host.api_address();

        let client = self
            .ctx
            .context()
            .replace_with(KUBE_CLIENT_KEY, |previous: Option<Arc<KubeClient>>| async move {
                if let Some(previous) = previous {
                    if let Err(err) = previous.close().await {
                        tracing::warn!("failed to close previous kube client: {}", err);
                    }
                }
                let forward = transport
                    .forward_port(api_address, API_PORT, LocalBind::default())
                    .await?;
                Ok::<_, anyhow::Error>(KubeClient::new(config, forward))
            })
            .await?;

        tracing::debug!("kube api reachable at {}", client.server());
        Ok(())
    }
}

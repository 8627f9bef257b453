use crate::host::Host;
use crate::phase::{Phase, PhaseContext};
use async_trait::async_trait;
use rigflow_ssh::{ExecOptions, SshError, shell_escape};
use std::sync::Arc;

/// `kubectl drain` invocation for a node
pub fn drain_command(hostname: &str, timeout: &str) -> String {
    format!(
        "kubectl drain --grace-period=120 --force --timeout={} --ignore-daemonsets --delete-emptydir-data {}",
        timeout,
        shell_escape(hostname)
    )
}

/// Evict workloads from the node before maintenance
///
/// Runs on the primary master. Only a remote command failure is tolerated:
/// it is logged and the phase succeeds.
pub struct Drain {
    host: Arc<Host>,
    ctx: PhaseContext,
}

#[async_trait]
impl Phase for Drain {
    const TITLE: &'static str = "Drain node";

    fn new(host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self { host, ctx }
    }

    async fn call(&self) -> anyhow::Result<()> {
        let master = self.ctx.master_host()?;
        let cmd = drain_command(self.host.hostname(), &self.ctx.maintenance().drain_timeout);

        tracing::info!("draining {}", self.host.hostname());
        match master
            .transport()
            .exec_or_fail(&cmd, ExecOptions::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(err @ SshError::ExecFailed { .. }) => {
                tracing::error!("failed to drain node: {}", err);
                Ok(())
            }
            Err(err) => Err(err.into()),
        }
    }
}

//! Rolling reboot of cluster nodes

use crate::cluster_manager::ClusterManager;
use crate::error::Result;
use crate::host::Host;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Outcome of [`reboot_hosts`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebootSummary {
    pub masters: usize,
    pub workers: usize,
    pub elapsed: Duration,
}

impl RebootSummary {
    pub fn total(&self) -> usize {
        self.masters + self.workers
    }
}

impl std::fmt::Display for RebootSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let total = self.total();
        write!(
            f,
            "rebooted {} node{} (took {}s)",
            total,
            if total == 1 { "" } else { "s" },
            self.elapsed.as_secs()
        )
    }
}

/// Reboot masters one at a time, then all workers in parallel
///
/// Hosts without a role are left alone.
pub async fn reboot_hosts(manager: &ClusterManager, hosts: &[Arc<Host>]) -> Result<RebootSummary> {
    let started = Instant::now();

    let masters: Vec<_> = hosts.iter().filter(|h| h.is_master()).cloned().collect();
    let workers: Vec<_> = hosts.iter().filter(|h| h.is_worker()).cloned().collect();

    if !masters.is_empty() {
        tracing::info!("rebooting {} master node(s)", masters.len());
        manager.apply_reboot_hosts(&masters, false).await?;
    }

    if !workers.is_empty() {
        tracing::info!("rebooting {} worker node(s)", workers.len());
        manager.apply_reboot_hosts(&workers, true).await?;
    }

    let summary = RebootSummary {
        masters: masters.len(),
        workers: workers.len(),
        elapsed: started.elapsed(),
    };
    tracing::info!("{}", summary);
    Ok(summary)
}

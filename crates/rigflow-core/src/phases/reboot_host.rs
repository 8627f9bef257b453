use crate::host::Host;
use crate::phase::{Phase, PhaseContext};
use async_trait::async_trait;
use rigflow_ssh::{
    ConnectOptions, ErrorClass, ExecOptions, RetryPolicy, SshError, poll_until, shell_escape,
};
use std::sync::Arc;
use std::time::Duration;

/// Trigger script. Schedules the reboot and prints the delay in seconds.
pub const REBOOT_SCRIPT: &str = include_str!("../../scripts/reboot-asap.sh");

const REBOOT_SCRIPT_NAME: &str = "reboot-asap.sh";

/// Reboot the node and wait for it to rejoin
///
/// Remote hosts go through reboot, reconnect and uncordon. A local host only
/// gets the trigger: this process goes down with it.
pub struct RebootHost {
    host: Arc<Host>,
    ctx: PhaseContext,
}

/// Errors worth another reconnect attempt while the node comes back
fn reconnect_class(err: &SshError) -> ErrorClass {
    ErrorClass::from_retryable(
        err.is_transient() || err.is_not_connected() || matches!(err, SshError::ExecFailed { .. }),
    )
}

/// Seconds until the scheduled reboot, as printed by the trigger script
fn parse_delay(out: &str) -> u64 {
    match out.trim().parse() {
        Ok(seconds) => seconds,
        Err(err) => {
            tracing::warn!(
                "unexpected output from {} ({}), assuming an immediate reboot: {:?}",
                REBOOT_SCRIPT_NAME,
                err,
                out
            );
            0
        }
    }
}

impl RebootHost {
    async fn trigger(&self) -> anyhow::Result<u64> {
        tracing::debug!("sending the reboot command");
        let out = self
            .host
            .transport()
            .exec_script_source(REBOOT_SCRIPT_NAME, REBOOT_SCRIPT, &[])
            .await?;
        Ok(parse_delay(&out))
    }

    async fn reboot(&self) -> anyhow::Result<()> {
        let seconds = self.trigger().await?;
        self.host.transport().disconnect().await;

        tracing::info!(
            "scheduled a reboot in {} second{}, waiting",
            seconds,
            if seconds == 1 { "" } else { "s" }
        );
        tokio::time::sleep(Duration::from_secs(seconds)).await;

        tracing::debug!("allowing the host time to start shutting down");
        tokio::time::sleep(Duration::from_secs(self.ctx.maintenance().reboot_settle_secs)).await;
        Ok(())
    }

    async fn reconnect(&self) -> anyhow::Result<()> {
        let settings = self.ctx.maintenance();
        let transport = self.host.transport();
        let require_timeout = self.ctx.config().transport.require_timeout();
        let policy = RetryPolicy::new(
            settings.reconnect_attempts,
            Duration::from_millis(settings.reconnect_delay_ms),
        );

        tracing::info!("reconnecting and waiting for kubelet to start");
        policy
            .perform(reconnect_class, |_| async move {
                if !transport.is_connected().await {
                    transport
                        .connect(ConnectOptions::with_timeout(require_timeout))
                        .await?;
                }
                transport
                    .exec_or_fail("systemctl is-active kubelet", ExecOptions::default())
                    .await
            })
            .await?;
        tracing::debug!("connected");
        Ok(())
    }

    /// Poll until the master reports the node already uncordoned
    ///
    /// Unbounded: a node that never comes back stalls here.
    async fn uncordon(&self) -> anyhow::Result<()> {
        let master = self.ctx.master_host()?;
        let cmd = format!(
            "kubectl uncordon {} | grep -q 'already uncordoned'",
            shell_escape(self.host.hostname())
        );
        let interval = Duration::from_millis(self.ctx.maintenance().uncordon_poll_ms);

        let transport = master.transport();
        let cmd = cmd.as_str();

        tracing::info!("uncordoning");
        let polls = poll_until(interval, move || {
            transport.exec_bool(cmd, ExecOptions::default())
        })
        .await?;
        tracing::debug!("uncordoned after {} poll(s)", polls);
        Ok(())
    }
}

#[async_trait]
impl Phase for RebootHost {
    const TITLE: &'static str = "Reboot hosts";

    fn new(host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self { host, ctx }
    }

    async fn call(&self) -> anyhow::Result<()> {
        if self.host.is_local() {
            let seconds = self.trigger().await?;
            tracing::info!("local host reboot scheduled in {} second(s)", seconds);
            return Ok(());
        }

        self.reboot().await?;
        self.reconnect().await?;
        self.uncordon().await
    }
}

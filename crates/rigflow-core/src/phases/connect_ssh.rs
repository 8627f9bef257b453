use crate::host::Host;
use crate::phase::{Phase, PhaseContext};
use async_trait::async_trait;
use rigflow_ssh::ConnectOptions;
use std::sync::Arc;

/// Open the host's transport
pub struct ConnectSsh {
    host: Arc<Host>,
}

#[async_trait]
impl Phase for ConnectSsh {
    const TITLE: &'static str = "Open SSH connection";

    fn new(host: Arc<Host>, _ctx: PhaseContext) -> Self {
        Self { host }
    }

    async fn call(&self) -> anyhow::Result<()> {
        tracing::debug!("connecting");
        self.host
            .transport()
            .connect(ConnectOptions::default())
            .await?;
        Ok(())
    }
}

//! Loopback backend for the machine rigflow itself runs on

use crate::command::CommandResult;
use crate::error::{Result, SshError};
use crate::process;
use crate::session::{
    ConnectOptions, Connector, Gateway, LocalBind, PortForward, Session, Target,
};
use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::process::Command;

/// Runs commands with `sh -c` on the local machine
#[derive(Debug, Clone, Default)]
pub struct LocalConnector;

impl LocalConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for LocalConnector {
    async fn connect(
        &self,
        _target: &Target,
        _options: &ConnectOptions,
        _gateway: Option<Arc<dyn Gateway>>,
    ) -> Result<Box<dyn Session>> {
        Ok(Box::new(LocalSession::default()))
    }

    async fn open_gateway(
        &self,
        target: &Target,
        _options: &ConnectOptions,
    ) -> Result<Arc<dyn Gateway>> {
        Err(SshError::Connect(format!(
            "{} is a local host and cannot act as a gateway",
            target.address
        )))
    }
}

#[derive(Debug, Default)]
struct LocalSession {
    closed: AtomicBool,
}

#[async_trait]
impl Session for LocalSession {
    async fn exec(&self, cmd: &str, stdin: Option<&str>) -> Result<CommandResult> {
        let mut sh = Command::new("sh");
        sh.arg("-c").arg(cmd);
        let output = process::run(sh, stdin).await?;
        Ok(process::to_result(cmd, &output))
    }

    async fn forward(
        &self,
        remote_host: &str,
        remote_port: u16,
        _bind: &LocalBind,
    ) -> Result<Box<dyn PortForward>> {
        // Already local: the remote address is directly reachable.
        Ok(Box::new(DirectForward {
            host: remote_host.to_string(),
            port: remote_port,
        }))
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct DirectForward {
    host: String,
    port: u16,
}

#[async_trait]
impl PortForward for DirectForward {
    fn local_host(&self) -> &str {
        &self.host
    }

    fn local_port(&self) -> u16 {
        self.port
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

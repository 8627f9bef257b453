//! OpenSSH backend
//!
//! Wraps the system `ssh` binary. A session is a control master started with
//! `ssh -M -S <socket> -f -N`; commands, forwards and shutdown are issued
//! against that socket. A bastion gateway is a control master on the bastion,
//! and tunneled masters reach their host with
//! `ProxyCommand=ssh -S <gateway socket> -W %h:%p <bastion>`.

use crate::command::CommandResult;
use crate::error::{Result, SshError};
use crate::process;
use crate::session::{
    ConnectOptions, Connector, Gateway, LocalBind, PortForward, Session, Target,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::process::Command;

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Exit status ssh uses for its own failures
const SSH_ERROR_STATUS: i32 = 255;

/// Line prefixes of diagnostics printed by ssh itself rather than the remote
/// command
const SSH_DIAGNOSTICS: [&str; 7] = [
    "ssh: ",
    "mux_client_",
    "control socket",
    "connection to ",
    "connection closed by ",
    "kex_exchange_identification",
    "ssh_exchange_identification",
];

/// Last line of `stderr` that ssh printed about its own connection
fn ssh_diagnostic(stderr: &str) -> Option<&str> {
    stderr.lines().map(str::trim).rev().find(|line| {
        let lower = line.to_ascii_lowercase();
        SSH_DIAGNOSTICS.iter().any(|prefix| lower.starts_with(prefix))
            && (!lower.starts_with("connection to ") || lower.contains(" closed"))
    })
}

/// Connector driving the `ssh` binary
#[derive(Debug, Clone)]
pub struct OpenSshConnector {
    program: String,
    control_dir: PathBuf,
    strict_host_key_checking: String,
}

impl Default for OpenSshConnector {
    fn default() -> Self {
        Self {
            program: "ssh".to_string(),
            control_dir: std::env::temp_dir(),
            strict_host_key_checking: "accept-new".to_string(),
        }
    }
}

impl OpenSshConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory for control sockets (keep the path short; sockets are
    /// limited to ~100 bytes)
    pub fn with_control_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.control_dir = dir.into();
        self
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    pub fn with_strict_host_key_checking(mut self, value: impl Into<String>) -> Self {
        self.strict_host_key_checking = value.into();
        self
    }

    fn control_path(&self) -> PathBuf {
        let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
        self.control_dir
            .join(format!("rigflow-{}-{}.sock", std::process::id(), seq))
    }

    fn master_args(
        &self,
        target: &Target,
        options: &ConnectOptions,
        control: &Path,
        proxy: Option<&str>,
    ) -> Vec<String> {
        let mut args = vec![
            "-M".to_string(),
            "-S".to_string(),
            control.display().to_string(),
            "-f".to_string(),
            "-N".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", self.strict_host_key_checking),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
            "-p".to_string(),
            target.port.to_string(),
        ];

        if let Some(key) = &target.ssh_key_path {
            args.push("-i".to_string());
            args.push(key.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        if let Some(timeout) = options.timeout {
            args.push("-o".to_string());
            args.push(format!("ConnectTimeout={}", timeout.as_secs().max(1)));
        }
        if let Some(proxy) = proxy {
            args.push("-o".to_string());
            args.push(format!("ProxyCommand={}", proxy));
        }

        args.push(target.destination());
        args
    }

    async fn start_master(
        &self,
        target: &Target,
        options: &ConnectOptions,
        proxy: Option<&str>,
    ) -> Result<ControlMaster> {
        let control = self.control_path();
        let mut cmd = Command::new(&self.program);
        cmd.args(self.master_args(target, options, &control, proxy));

        tracing::debug!("starting control master for {}", target);
        let output = process::run(cmd, None).await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SshError::from_ssh_stderr(&target.to_string(), &stderr));
        }

        Ok(ControlMaster {
            program: self.program.clone(),
            control,
            destination: target.destination(),
            lost: AtomicBool::new(false),
            exited: AtomicBool::new(false),
        })
    }
}

#[async_trait]
impl Connector for OpenSshConnector {
    async fn connect(
        &self,
        target: &Target,
        options: &ConnectOptions,
        gateway: Option<Arc<dyn Gateway>>,
    ) -> Result<Box<dyn Session>> {
        let proxy = gateway.as_ref().map(|g| g.proxy_command());
        let master = self.start_master(target, options, proxy.as_deref()).await?;
        Ok(Box::new(OpenSshSession { master }))
    }

    async fn open_gateway(
        &self,
        target: &Target,
        options: &ConnectOptions,
    ) -> Result<Arc<dyn Gateway>> {
        let master = self.start_master(target, options, None).await?;
        Ok(Arc::new(OpenSshGateway { master }))
    }
}

/// A running control master
#[derive(Debug)]
struct ControlMaster {
    program: String,
    control: PathBuf,
    destination: String,
    /// The master looked dead to a command
    lost: AtomicBool,
    /// `-O exit` has been sent
    exited: AtomicBool,
}

impl ControlMaster {
    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-S")
            .arg(&self.control)
            .args(["-o", "ControlMaster=no", "-o", "BatchMode=yes"]);
        cmd
    }

    fn is_closed(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
            || self.exited.load(Ordering::SeqCst)
            || !self.control.exists()
    }

    /// Ask the master whether it is still running
    async fn check(&self) -> bool {
        self.control("check", &[]).await.is_ok()
    }

    /// Send a `-O <op>` control request
    async fn control(&self, op: &str, extra: &[&str]) -> Result<()> {
        let mut cmd = self.command();
        cmd.args(["-O", op]).args(extra).arg(&self.destination);
        let output = process::run(cmd, None).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SshError::from_ssh_stderr(&self.destination, &stderr))
        }
    }

    /// Stop the master and remove its socket, also when it was marked lost
    async fn exit(&self) -> Result<()> {
        if self.exited.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Err(err) = self.control("exit", &[]).await {
            tracing::warn!("{}: control master exit failed: {}", self.destination, err);
        }
        if let Err(err) = tokio::fs::remove_file(&self.control).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("failed to remove {}: {}", self.control.display(), err);
            }
        }
        Ok(())
    }
}

struct OpenSshSession {
    master: ControlMaster,
}

#[async_trait]
impl Session for OpenSshSession {
    async fn exec(&self, cmd: &str, stdin: Option<&str>) -> Result<CommandResult> {
        let mut ssh = self.master.command();
        ssh.arg(&self.master.destination).arg("--").arg(cmd);

        let output = process::run(ssh, stdin).await?;
        let result = process::to_result(cmd, &output);

        // 255 is also a legal exit status for the remote command. Only ssh's
        // own diagnostics on a master that fails `-O check` mean a lost link.
        if result.exit_status == SSH_ERROR_STATUS {
            if let Some(diagnostic) = ssh_diagnostic(&result.stderr) {
                if !self.master.check().await {
                    let err = SshError::from_ssh_stderr(&self.master.destination, diagnostic);
                    if err.is_transient() {
                        self.master.lost.store(true, Ordering::SeqCst);
                        return Err(err);
                    }
                }
            }
        }
        Ok(result)
    }

    async fn forward(
        &self,
        remote_host: &str,
        remote_port: u16,
        bind: &LocalBind,
    ) -> Result<Box<dyn PortForward>> {
        let port = match bind.port {
            Some(port) => port,
            None => free_port(&bind.host)?,
        };
        let spec = format!("{}:{}:{}:{}", bind.host, port, remote_host, remote_port);
        self.master.control("forward", &["-L", spec.as_str()]).await?;

        Ok(Box::new(OpenSshForward {
            program: self.master.program.clone(),
            control: self.master.control.clone(),
            destination: self.master.destination.clone(),
            spec,
            host: bind.host.clone(),
            port,
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.master.exit().await
    }

    fn is_closed(&self) -> bool {
        self.master.is_closed()
    }
}

struct OpenSshGateway {
    master: ControlMaster,
}

#[async_trait]
impl Gateway for OpenSshGateway {
    fn proxy_command(&self) -> String {
        format!(
            "{} -S {} -o ControlMaster=no -W %h:%p {}",
            self.master.program,
            self.master.control.display(),
            self.master.destination
        )
    }

    fn is_active(&self) -> bool {
        !self.master.is_closed()
    }

    async fn shutdown(&self) -> Result<()> {
        self.master.exit().await
    }
}

struct OpenSshForward {
    program: String,
    control: PathBuf,
    destination: String,
    spec: String,
    host: String,
    port: u16,
    closed: AtomicBool,
}

#[async_trait]
impl PortForward for OpenSshForward {
    fn local_host(&self) -> &str {
        &self.host
    }

    fn local_port(&self) -> u16 {
        self.port
    }

    async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) || !self.control.exists() {
            return Ok(());
        }
        let mut cmd = Command::new(&self.program);
        cmd.arg("-S")
            .arg(&self.control)
            .args(["-O", "cancel", "-L", self.spec.as_str()])
            .arg(&self.destination);
        let output = process::run(cmd, None).await?;
        if output.status.success() {
            Ok(())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(SshError::from_ssh_stderr(&self.destination, &stderr))
        }
    }
}

/// Ask the OS for an unused local port
fn free_port(host: &str) -> Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0))?;
    Ok(listener.local_addr()?.port())
}

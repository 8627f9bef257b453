//! Remote command execution

use crate::error::{Result, SshError};
use crate::session::Session;

/// Per-command options
#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Data piped to the command's standard input
    pub stdin: Option<String>,

    /// Human label for logs (script name etc.)
    pub source: Option<String>,
}

impl ExecOptions {
    pub fn with_stdin(mut self, stdin: impl Into<String>) -> Self {
        self.stdin = Some(stdin.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Outcome of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    pub command: String,
    pub stdout: String,
    pub stderr: String,
    /// Exit status; -1 when the process died from a signal
    pub exit_status: i32,
}

impl CommandResult {
    pub fn new(
        command: impl Into<String>,
        exit_status: i32,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_status,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_status == 0
    }

    pub fn error(&self) -> bool {
        !self.success()
    }

    /// Turn a non-zero exit into [`SshError::ExecFailed`]
    pub fn into_checked(self, host: &str) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(SshError::ExecFailed {
                host: host.to_string(),
                command: self.command,
                status: self.exit_status,
                stderr: self.stderr,
            })
        }
    }
}

/// A single command bound to one live session
pub struct RemoteCommand<'a> {
    session: &'a dyn Session,
    host: &'a str,
    cmd: String,
    options: ExecOptions,
}

impl<'a> RemoteCommand<'a> {
    pub fn new(
        session: &'a dyn Session,
        host: &'a str,
        cmd: impl Into<String>,
        options: ExecOptions,
    ) -> Self {
        Self {
            session,
            host,
            cmd: cmd.into(),
            options,
        }
    }

    /// Run and return the result whatever the exit status
    pub async fn run(self) -> Result<CommandResult> {
        match &self.options.source {
            Some(source) => tracing::debug!("exec: {} < {}", self.cmd, source),
            None => tracing::debug!("exec: {}", self.cmd),
        }

        let result = self.session.exec(&self.cmd, self.options.stdin.as_deref()).await?;

        for line in result.stdout.lines() {
            tracing::debug!("  {}", line);
        }
        for line in result.stderr.lines() {
            tracing::debug!("! {}", line);
        }
        if result.error() {
            tracing::debug!("exit status {}", result.exit_status);
        }

        Ok(result)
    }

    /// Run and fail on a non-zero exit status
    pub async fn run_checked(self) -> Result<CommandResult> {
        let host = self.host;
        self.run().await?.into_checked(host)
    }
}

//! SSH transport error types

use std::path::PathBuf;
use thiserror::Error;

/// Transport and remote execution errors
#[derive(Error, Debug)]
pub enum SshError {
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    #[error("Connection reset: {0}")]
    ConnectionReset(String),

    #[error("Connection aborted: {0}")]
    ConnectionAborted(String),

    #[error("Connection timed out: {0}")]
    Timeout(String),

    #[error("Disconnected: {0}")]
    Disconnected(String),

    #[error("SSH protocol error: {0}")]
    Protocol(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Authentication failed for {0}")]
    AuthenticationFailed(String),

    #[error("Could not resolve host: {0}")]
    HostResolution(String),

    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Connection not established to {host} ({source})")]
    NotConnected {
        host: String,
        #[source]
        source: Box<SshError>,
    },

    #[error("Command `{command}` failed on {host} with exit status {status}\n{stderr}")]
    ExecFailed {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    #[error("Failed to read script {path}: {source}")]
    Script {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SshError {
    /// Network and protocol hiccups worth another connection attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SshError::ConnectionRefused(_)
                | SshError::ConnectionReset(_)
                | SshError::ConnectionAborted(_)
                | SshError::Timeout(_)
                | SshError::Disconnected(_)
                | SshError::Protocol(_)
                | SshError::Io(_)
        )
    }

    pub fn is_not_connected(&self) -> bool {
        matches!(self, SshError::NotConnected { .. })
    }

    /// Exit status of a failed remote command
    pub fn exit_status(&self) -> Option<i32> {
        match self {
            SshError::ExecFailed { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Map the diagnostic ssh prints on exit 255 to an error kind
    pub fn from_ssh_stderr(target: &str, stderr: &str) -> Self {
        let message = format!("{}: {}", target, stderr.trim());
        let lower = stderr.to_ascii_lowercase();

        if lower.contains("connection refused") {
            SshError::ConnectionRefused(message)
        } else if lower.contains("connection reset") {
            SshError::ConnectionReset(message)
        } else if lower.contains("software caused connection abort")
            || lower.contains("connection aborted")
        {
            SshError::ConnectionAborted(message)
        } else if lower.contains("timed out") {
            SshError::Timeout(message)
        } else if lower.contains("permission denied") || lower.contains("too many authentication") {
            SshError::AuthenticationFailed(message)
        } else if lower.contains("could not resolve hostname")
            || lower.contains("name or service not known")
        {
            SshError::HostResolution(message)
        } else if lower.contains("kex_exchange_identification")
            || lower.contains("banner exchange")
            || lower.contains("protocol")
        {
            SshError::Protocol(message)
        } else if lower.contains("closed by remote host")
            || lower.contains("connection closed")
            || lower.contains("broken pipe")
            || lower.contains("control socket")
            || lower.contains("mux_client")
            || lower.contains("no route to host")
            || lower.contains("network is unreachable")
        {
            SshError::Disconnected(message)
        } else {
            SshError::Connect(message)
        }
    }
}

pub type Result<T> = std::result::Result<T, SshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_ssh_stderr() {
        let refused = SshError::from_ssh_stderr(
            "core@10.0.0.1",
            "ssh: connect to host 10.0.0.1 port 22: Connection refused",
        );
        assert!(matches!(refused, SshError::ConnectionRefused(_)));
        assert!(refused.is_transient());

        let timeout = SshError::from_ssh_stderr(
            "core@10.0.0.1",
            "ssh: connect to host 10.0.0.1 port 22: Operation timed out",
        );
        assert!(matches!(timeout, SshError::Timeout(_)));

        let auth = SshError::from_ssh_stderr("core@10.0.0.1", "core@10.0.0.1: Permission denied (publickey).");
        assert!(matches!(auth, SshError::AuthenticationFailed(_)));
        assert!(!auth.is_transient());

        let closed = SshError::from_ssh_stderr("core@10.0.0.1", "Connection to 10.0.0.1 closed by remote host.");
        assert!(closed.is_transient());

        let unknown = SshError::from_ssh_stderr("core@10.0.0.1", "something odd");
        assert!(!unknown.is_transient());
    }

    #[test]
    fn test_exec_failed_message() {
        let err = SshError::ExecFailed {
            host: "10.0.0.1".to_string(),
            command: "false".to_string(),
            status: 3,
            stderr: "boom".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("exit status 3"));
        assert!(message.contains("boom"));
        assert_eq!(err.exit_status(), Some(3));
    }
}

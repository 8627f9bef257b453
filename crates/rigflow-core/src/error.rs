//! Orchestration error types

use rigflow_config::ConfigError;
use rigflow_ssh::SshError;
use thiserror::Error;

/// One host's failure within a phase run
#[derive(Debug)]
pub struct HostFailure {
    pub host: String,
    pub error: anyhow::Error,
}

impl std::fmt::Display for HostFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {:#}", self.host, self.error)
    }
}

/// Orchestrator errors
#[derive(Error, Debug)]
pub enum ClusterError {
    #[error(transparent)]
    Ssh(#[from] SshError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("{phase} requires context entry '{key}'")]
    MissingContext { phase: &'static str, key: String },

    #[error("Phase not registered: {0}")]
    PhaseNotRegistered(&'static str),

    #[error("Unknown host: {0}")]
    UnknownHost(String),

    #[error("No master host in cluster configuration")]
    NoMasterHost,

    #[error("{phase} failed on {} host(s):\n{}", failures.len(), format_failures(failures))]
    PhaseFailed {
        phase: String,
        failures: Vec<HostFailure>,
    },
}

impl ClusterError {
    /// Hosts named in a phase failure, in dispatch order
    pub fn failed_hosts(&self) -> Vec<&str> {
        match self {
            ClusterError::PhaseFailed { failures, .. } => {
                failures.iter().map(|f| f.host.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}

fn format_failures(failures: &[HostFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("  {}", f))
        .collect::<Vec<_>>()
        .join("\n")
}

pub type Result<T> = std::result::Result<T, ClusterError>;

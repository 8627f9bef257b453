//! rigflow SSH transport
//!
//! Remote execution layer used by the rigflow orchestrator.
//!
//! # Layers
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │ SshClient (one per host)                  │
//! │  connect / exec / exec_script / file /    │
//! │  forward_port / disconnect                │
//! └──────────────┬────────────────────────────┘
//!                │ Connector / Session / Gateway
//!        ┌───────┴────────┐
//! ┌──────▼───────┐ ┌──────▼───────┐
//! │ OpenSSH      │ │ Local        │
//! │ control mstr │ │ sh -c        │
//! └──────────────┘ └──────────────┘
//! ```

pub mod client;
pub mod command;
pub mod env;
pub mod error;
pub mod file;
pub mod local;
pub mod openssh;
mod process;
pub mod retry;
pub mod session;

// Re-exports
pub use client::{ConnectionStatus, SshClient};
pub use command::{CommandResult, ExecOptions, RemoteCommand};
pub use env::{EXPORT_ENVS, EnvValue, export_env, script_command, shell_escape};
pub use error::{Result, SshError};
pub use file::RemoteFile;
pub use local::LocalConnector;
pub use openssh::OpenSshConnector;
pub use retry::{ErrorClass, RetryPolicy, poll_until};
pub use session::{
    ConnectOptions, Connector, Gateway, LocalBind, PortForward, Session, Target,
};

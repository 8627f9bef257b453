//! rigflow orchestration core
//!
//! Runs phases across a cluster over the rigflow SSH transport.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ ClusterManager                              │
//! │  apply_phase / apply_reboot_hosts /         │
//! │  connect_hosts / disconnect                 │
//! │  ┌──────────────┐  ┌──────────────────────┐ │
//! │  │ PhaseLocks   │  │ ClusterContext       │ │
//! │  └──────────────┘  └──────────────────────┘ │
//! └──────────────┬──────────────────────────────┘
//!                │ Phase::new(host, ctx).call()
//! ┌──────────────▼──────────────────────────────┐
//! │ Host ── SshClient ──(gateway)── Bastion     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod cluster_manager;
pub mod context;
pub mod error;
pub mod host;
pub mod kube;
pub mod phase;
pub mod phases;
pub mod reboot;

// Re-exports
pub use cluster_manager::{ClusterManager, ClusterManagerBuilder};
pub use context::ClusterContext;
pub use error::{ClusterError, HostFailure, Result};
pub use host::{Bastion, Host};
pub use kube::{API_PORT, KUBE_CLIENT_KEY, KubeClient};
pub use phase::{HostSelector, Phase, PhaseContext, PhaseLocks};
pub use reboot::{RebootSummary, reboot_hosts};

//! Built-in phases

mod configure_client;
mod connect_ssh;
mod drain;
mod reboot_host;

pub use configure_client::{ADMIN_KUBECONFIG, ConfigureClient};
pub use connect_ssh::ConnectSsh;
pub use drain::{Drain, drain_command};
pub use reboot_host::{REBOOT_SCRIPT, RebootHost};

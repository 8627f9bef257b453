//! Kubernetes API access through a forwarded port
//!
//! Only the connection details are produced here: a server URL on a local
//! forward and the kubeconfig pointing at it. Talking to the API is left to
//! the caller.

use rigflow_ssh::PortForward;
use serde_yaml::Value;

/// Context key the configured client is cached under
pub const KUBE_CLIENT_KEY: &str = "kube_client";

/// API server port on master nodes
pub const API_PORT: u16 = 6443;

/// Kube API endpoint reachable from this process
pub struct KubeClient {
    server: String,
    config: Value,
    forward: Box<dyn PortForward>,
}

impl KubeClient {
    /// Build a client from a remote kubeconfig and the forward to its API
    ///
    /// Every cluster entry's `server` is rewritten to the forwarded address.
    pub fn new(mut config: Value, forward: Box<dyn PortForward>) -> Self {
        let server = format!("https://{}", forward.local_address());
        if let Some(clusters) = config.get_mut("clusters").and_then(Value::as_sequence_mut) {
            for entry in clusters {
                if let Some(cluster) = entry.get_mut("cluster").and_then(Value::as_mapping_mut) {
                    cluster.insert(Value::from("server"), Value::from(server.clone()));
                }
            }
        }
        Self {
            server,
            config,
            forward,
        }
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    pub fn local_port(&self) -> u16 {
        self.forward.local_port()
    }

    /// Kubeconfig with the rewritten server
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn kubeconfig_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(&self.config)
    }

    /// Release the port forward
    pub async fn close(&self) -> rigflow_ssh::Result<()> {
        self.forward.close().await
    }
}

impl std::fmt::Debug for KubeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KubeClient")
            .field("server", &self.server)
            .finish()
    }
}

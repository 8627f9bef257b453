#![allow(dead_code)]

use async_trait::async_trait;
use rigflow_config::{ClusterConfig, HostConfig, Role};
use rigflow_core::ClusterManager;
use rigflow_ssh::{
    CommandResult, ConnectOptions, Connector, Gateway, LocalBind, PortForward, Session, SshError,
    Target,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&str, &str) -> CommandResult + Send + Sync;

#[derive(Default)]
struct State {
    connects: HashMap<String, u32>,
    failures: HashMap<String, VecDeque<SshError>>,
    /// (address, command fragment, refused connects to queue when it runs)
    outages: Vec<(String, String, usize)>,
    commands: Vec<(String, String)>,
    /// Session, gateway and tunnel lifecycle, in order
    events: Vec<String>,
}

/// Connector scripted per host address
///
/// The responder receives `(address, command)`. Commands are recorded in
/// order across all hosts.
pub struct ScriptedConnector {
    state: Arc<Mutex<State>>,
    responder: Arc<Responder>,
    pub forward_closes: Arc<AtomicU32>,
}

impl ScriptedConnector {
    pub fn new(
        responder: impl Fn(&str, &str) -> CommandResult + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Arc::new(Mutex::new(State::default())),
            responder: Arc::new(responder),
            forward_closes: Arc::new(AtomicU32::new(0)),
        })
    }

    /// Every command succeeds with empty output
    pub fn ok() -> Arc<Self> {
        Self::new(|_, cmd| CommandResult::new(cmd, 0, "", ""))
    }

    /// After a command containing `trigger` runs on `address`, refuse the
    /// next `refusals` connections to it
    pub fn outage_after(&self, address: &str, trigger: &str, refusals: usize) {
        self.state.lock().unwrap().outages.push((
            address.to_string(),
            trigger.to_string(),
            refusals,
        ));
    }

    pub fn connects(&self, address: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .connects
            .get(address)
            .copied()
            .unwrap_or(0)
    }

    pub fn commands(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().commands.clone()
    }

    pub fn commands_on(&self, address: &str) -> Vec<String> {
        self.commands()
            .into_iter()
            .filter(|(a, _)| a == address)
            .map(|(_, cmd)| cmd)
            .collect()
    }

    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn count_events(&self, event: &str) -> usize {
        self.events().iter().filter(|e| *e == event).count()
    }

    pub fn count(&self, address: &str, fragment: &str) -> usize {
        self.commands_on(address)
            .iter()
            .filter(|cmd| cmd.contains(fragment))
            .count()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        target: &Target,
        _options: &ConnectOptions,
        gateway: Option<Arc<dyn Gateway>>,
    ) -> rigflow_ssh::Result<Box<dyn Session>> {
        let failure = {
            let mut state = self.state.lock().unwrap();
            *state.connects.entry(target.address.clone()).or_default() += 1;
            if let Some(gateway) = &gateway {
                let event = format!("tunnel {} via {}", target.address, gateway.proxy_command());
                state.events.push(event);
            }
            state
                .failures
                .get_mut(&target.address)
                .and_then(|queue| queue.pop_front())
        };
        if let Some(err) = failure {
            return Err(err);
        }
        Ok(Box::new(ScriptedSession {
            address: target.address.clone(),
            state: self.state.clone(),
            responder: self.responder.clone(),
            forward_closes: self.forward_closes.clone(),
            closed: Mutex::new(false),
        }))
    }

    async fn open_gateway(
        &self,
        target: &Target,
        _options: &ConnectOptions,
    ) -> rigflow_ssh::Result<Arc<dyn Gateway>> {
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("open {}", target.address));
        Ok(Arc::new(ScriptedGateway {
            address: target.address.clone(),
            state: self.state.clone(),
            active: Mutex::new(true),
        }))
    }
}

struct ScriptedSession {
    address: String,
    state: Arc<Mutex<State>>,
    responder: Arc<Responder>,
    forward_closes: Arc<AtomicU32>,
    closed: Mutex<bool>,
}

#[async_trait]
impl Session for ScriptedSession {
    async fn exec(&self, cmd: &str, _stdin: Option<&str>) -> rigflow_ssh::Result<CommandResult> {
        {
            let mut state = self.state.lock().unwrap();
            state.commands.push((self.address.clone(), cmd.to_string()));

            let triggered: Vec<usize> = state
                .outages
                .iter()
                .filter(|(address, trigger, _)| *address == self.address && cmd.contains(trigger))
                .map(|(_, _, refusals)| *refusals)
                .collect();
            for refusals in triggered {
                let queue = state.failures.entry(self.address.clone()).or_default();
                for _ in 0..refusals {
                    queue.push_back(SshError::ConnectionRefused(format!(
                        "{}: connection refused",
                        self.address
                    )));
                }
            }
        }
        Ok((self.responder)(&self.address, cmd))
    }

    async fn forward(
        &self,
        _remote_host: &str,
        remote_port: u16,
        bind: &LocalBind,
    ) -> rigflow_ssh::Result<Box<dyn PortForward>> {
        Ok(Box::new(ScriptedForward {
            host: bind.host.clone(),
            port: bind.port.unwrap_or(40000 + remote_port % 1000),
            closes: self.forward_closes.clone(),
        }))
    }

    async fn close(&self) -> rigflow_ssh::Result<()> {
        *self.closed.lock().unwrap() = true;
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("close {}", self.address));
        Ok(())
    }

    fn is_closed(&self) -> bool {
        *self.closed.lock().unwrap()
    }
}

struct ScriptedGateway {
    address: String,
    state: Arc<Mutex<State>>,
    active: Mutex<bool>,
}

#[async_trait]
impl Gateway for ScriptedGateway {
    fn proxy_command(&self) -> String {
        self.address.clone()
    }

    fn is_active(&self) -> bool {
        *self.active.lock().unwrap()
    }

    async fn shutdown(&self) -> rigflow_ssh::Result<()> {
        *self.active.lock().unwrap() = false;
        self.state
            .lock()
            .unwrap()
            .events
            .push(format!("shutdown {}", self.address));
        Ok(())
    }
}

struct ScriptedForward {
    host: String,
    port: u16,
    closes: Arc<AtomicU32>,
}

#[async_trait]
impl PortForward for ScriptedForward {
    fn local_host(&self) -> &str {
        &self.host
    }

    fn local_port(&self) -> u16 {
        self.port
    }

    async fn close(&self) -> rigflow_ssh::Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn host(address: &str, role: Role, hostname: &str) -> HostConfig {
    HostConfig::new(address)
        .with_user("core")
        .with_role(role)
        .with_hostname(hostname)
}

pub fn manager(hosts: Vec<HostConfig>, connector: Arc<ScriptedConnector>) -> ClusterManager {
    ClusterManager::builder(ClusterConfig::new(hosts))
        .connector(connector.clone())
        .local_connector(connector)
        .build()
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

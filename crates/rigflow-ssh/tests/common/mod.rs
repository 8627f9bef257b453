use async_trait::async_trait;
use rigflow_ssh::{
    CommandResult, ConnectOptions, Connector, Gateway, LocalBind, PortForward, Session, SshError,
    Target,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

type Responder = dyn Fn(&str, Option<&str>) -> CommandResult + Send + Sync;

/// In-memory connector recording everything it is asked to do
pub struct MockConnector {
    pub connects: AtomicU32,
    pub gateways_opened: AtomicU32,
    pub gateway_shutdowns: Arc<AtomicU32>,
    pub session_closes: Arc<AtomicU32>,
    pub tunneled_connects: AtomicU32,
    pub commands: Arc<Mutex<Vec<(String, Option<String>)>>>,
    failures: Mutex<VecDeque<SshError>>,
    exec_failures: Arc<Mutex<VecDeque<SshError>>>,
    gateways: Mutex<Vec<Arc<MockGateway>>>,
    sessions: Mutex<Vec<Arc<AtomicBool>>>,
    responder: Arc<Responder>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_responder(|cmd, _| CommandResult::new(cmd, 0, "", ""))
    }

    pub fn with_responder(
        responder: impl Fn(&str, Option<&str>) -> CommandResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            connects: AtomicU32::new(0),
            gateways_opened: AtomicU32::new(0),
            gateway_shutdowns: Arc::new(AtomicU32::new(0)),
            session_closes: Arc::new(AtomicU32::new(0)),
            tunneled_connects: AtomicU32::new(0),
            commands: Arc::new(Mutex::new(Vec::new())),
            failures: Mutex::new(VecDeque::new()),
            exec_failures: Arc::new(Mutex::new(VecDeque::new())),
            gateways: Mutex::new(Vec::new()),
            sessions: Mutex::new(Vec::new()),
            responder: Arc::new(responder),
        }
    }

    /// Make the next connection attempts fail with these errors, in order
    pub fn fail_next(&self, errors: Vec<SshError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    /// Make the next commands fail at the transport level
    pub fn fail_next_exec(&self, errors: Vec<SshError>) {
        self.exec_failures.lock().unwrap().extend(errors);
    }

    /// Mark every gateway opened so far as dead
    pub fn kill_gateways(&self) {
        for gateway in self.gateways.lock().unwrap().iter() {
            gateway.active.store(false, Ordering::SeqCst);
        }
    }

    /// Mark every session opened so far as closed by the remote end
    pub fn kill_sessions(&self) {
        for closed in self.sessions.lock().unwrap().iter() {
            closed.store(true, Ordering::SeqCst);
        }
    }

    pub fn commands(&self) -> Vec<(String, Option<String>)> {
        self.commands.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _target: &Target,
        _options: &ConnectOptions,
        gateway: Option<Arc<dyn Gateway>>,
    ) -> rigflow_ssh::Result<Box<dyn Session>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        if let Some(gateway) = &gateway {
            if !gateway.is_active() {
                return Err(SshError::Disconnected("mock: gateway dead".to_string()));
            }
            self.tunneled_connects.fetch_add(1, Ordering::SeqCst);
        }
        let closed = Arc::new(AtomicBool::new(false));
        self.sessions.lock().unwrap().push(closed.clone());
        Ok(Box::new(MockSession {
            closed,
            closes: self.session_closes.clone(),
            commands: self.commands.clone(),
            exec_failures: self.exec_failures.clone(),
            responder: self.responder.clone(),
        }))
    }

    async fn open_gateway(
        &self,
        _target: &Target,
        _options: &ConnectOptions,
    ) -> rigflow_ssh::Result<Arc<dyn Gateway>> {
        self.gateways_opened.fetch_add(1, Ordering::SeqCst);
        let gateway = Arc::new(MockGateway {
            active: AtomicBool::new(true),
            shutdowns: self.gateway_shutdowns.clone(),
        });
        self.gateways.lock().unwrap().push(gateway.clone());
        Ok(gateway)
    }
}

pub struct MockSession {
    pub closed: Arc<AtomicBool>,
    closes: Arc<AtomicU32>,
    commands: Arc<Mutex<Vec<(String, Option<String>)>>>,
    exec_failures: Arc<Mutex<VecDeque<SshError>>>,
    responder: Arc<Responder>,
}

#[async_trait]
impl Session for MockSession {
    async fn exec(&self, cmd: &str, stdin: Option<&str>) -> rigflow_ssh::Result<CommandResult> {
        if let Some(err) = self.exec_failures.lock().unwrap().pop_front() {
            return Err(err);
        }
        self.commands
            .lock()
            .unwrap()
            .push((cmd.to_string(), stdin.map(str::to_string)));
        Ok((self.responder)(cmd, stdin))
    }

    async fn forward(
        &self,
        remote_host: &str,
        remote_port: u16,
        bind: &LocalBind,
    ) -> rigflow_ssh::Result<Box<dyn PortForward>> {
        Ok(Box::new(MockForward {
            host: bind.host.clone(),
            port: bind.port.unwrap_or(40000 + remote_port % 1000),
            remote: format!("{}:{}", remote_host, remote_port),
        }))
    }

    async fn close(&self) -> rigflow_ssh::Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub struct MockGateway {
    active: AtomicBool,
    shutdowns: Arc<AtomicU32>,
}

#[async_trait]
impl Gateway for MockGateway {
    fn proxy_command(&self) -> String {
        "mock -W %h:%p".to_string()
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn shutdown(&self) -> rigflow_ssh::Result<()> {
        self.active.store(false, Ordering::SeqCst);
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct MockForward {
    host: String,
    port: u16,
    #[allow(dead_code)]
    pub remote: String,
}

#[async_trait]
impl PortForward for MockForward {
    fn local_host(&self) -> &str {
        &self.host
    }

    fn local_port(&self) -> u16 {
        self.port
    }

    async fn close(&self) -> rigflow_ssh::Result<()> {
        Ok(())
    }
}

pub fn refused() -> SshError {
    SshError::ConnectionRefused("mock: connection refused".to_string())
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

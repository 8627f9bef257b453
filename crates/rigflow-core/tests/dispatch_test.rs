mod common;

use anyhow::Context;
use async_trait::async_trait;
use common::{ScriptedConnector, host, manager};
use rigflow_config::Role;
use rigflow_core::{ClusterError, ClusterManager, Host, Phase, PhaseContext};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const VISITS: &str = "visits";
const GAUGE: &str = "gauge";

type Visits = Mutex<Vec<String>>;

/// Records start and finish per host; fails on hostname "b"
struct Visit {
    host: Arc<Host>,
    ctx: PhaseContext,
}

#[async_trait]
impl Phase for Visit {
    const TITLE: &'static str = "Visit";

    fn new(host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self { host, ctx }
    }

    async fn call(&self) -> anyhow::Result<()> {
        let visits = self
            .ctx
            .context()
            .get::<Visits>(VISITS)
            .await
            .context("visit log missing")?;
        let name = self.host.hostname();

        visits.lock().unwrap().push(format!("start {}", name));
        if name == "b" {
            anyhow::bail!("{} exploded", name);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        visits.lock().unwrap().push(format!("done {}", name));
        Ok(())
    }
}

#[derive(Default)]
struct Gauge {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl Gauge {
    async fn measure(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.current.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Measures how many instances run at once
struct Busy {
    ctx: PhaseContext,
}

#[async_trait]
impl Phase for Busy {
    const TITLE: &'static str = "Busy";

    fn new(_host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    async fn call(&self) -> anyhow::Result<()> {
        let gauge = self.ctx.context().get::<Gauge>(GAUGE).await.context("no gauge")?;
        gauge.measure().await;
        Ok(())
    }
}

/// Like [`Busy`] but holds the phase-type lock
struct Exclusive {
    ctx: PhaseContext,
}

#[async_trait]
impl Phase for Exclusive {
    const TITLE: &'static str = "Exclusive";

    fn new(_host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    async fn call(&self) -> anyhow::Result<()> {
        let _guard = self.ctx.lock().await;
        let gauge = self.ctx.context().get::<Gauge>(GAUGE).await.context("no gauge")?;
        gauge.measure().await;
        Ok(())
    }
}

/// Needs a kube client that nobody configured
struct NeedsKube {
    ctx: PhaseContext,
}

#[async_trait]
impl Phase for NeedsKube {
    const TITLE: &'static str = "Needs kube";

    fn new(_host: Arc<Host>, ctx: PhaseContext) -> Self {
        Self { ctx }
    }

    async fn call(&self) -> anyhow::Result<()> {
        let client = self.ctx.kube_client().await?;
        tracing::debug!("using {}", client.server());
        Ok(())
    }
}

fn abc() -> ClusterManager {
    let mut manager = manager(
        vec![
            host("10.0.0.1", Role::Master, "a"),
            host("10.0.0.2", Role::Worker, "b"),
            host("10.0.0.3", Role::Worker, "c"),
        ],
        ScriptedConnector::ok(),
    );
    manager.register_phase::<Visit>();
    manager
}

async fn visits(manager: &ClusterManager) -> Vec<String> {
    manager
        .context()
        .get::<Visits>(VISITS)
        .await
        .map(|v| {
            let visits = v.lock().unwrap().clone();
            visits
        })
        .unwrap_or_default()
}

#[tokio::test(start_paused = true)]
async fn test_parallel_failure_does_not_stop_other_hosts() {
    common::init_tracing();
    let manager = abc();
    manager.context().insert(VISITS, Visits::default()).await;

    let err = manager.apply_phase::<Visit>(None, true).await.unwrap_err();

    assert_eq!(err.failed_hosts(), ["10.0.0.2"]);
    match &err {
        ClusterError::PhaseFailed { phase, failures } => {
            assert_eq!(phase, "Visit");
            assert_eq!(failures.len(), 1);
            assert_eq!(failures[0].error.to_string(), "b exploded");
        }
        other => panic!("expected PhaseFailed, got {:?}", other),
    }

    let visits = visits(&manager).await;
    assert!(visits.contains(&"done a".to_string()));
    assert!(visits.contains(&"done c".to_string()));
    assert!(!visits.contains(&"done b".to_string()));
}

#[tokio::test(start_paused = true)]
async fn test_serial_failure_stops_remaining_hosts() {
    let manager = abc();
    manager.context().insert(VISITS, Visits::default()).await;

    let err = manager.apply_phase::<Visit>(None, false).await.unwrap_err();

    assert_eq!(err.failed_hosts(), ["10.0.0.2"]);
    assert_eq!(visits(&manager).await, ["start a", "done a", "start b"]);
}

#[tokio::test(start_paused = true)]
async fn test_explicit_hosts_override_selector() {
    let manager = abc();
    manager.context().insert(VISITS, Visits::default()).await;
    let hosts = vec![manager.host("c").unwrap(), manager.host("a").unwrap()];

    manager.apply_phase::<Visit>(Some(hosts.as_slice()), false).await.unwrap();

    assert_eq!(
        visits(&manager).await,
        ["start c", "done c", "start a", "done a"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_parallel_respects_concurrency_ceiling() {
    let hosts = (1..=5)
        .map(|i| host(&format!("10.0.1.{}", i), Role::Worker, &format!("w{}", i)))
        .collect();
    let mut manager = ClusterManager::builder(rigflow_config::ClusterConfig::new(hosts))
        .connector(ScriptedConnector::ok())
        .max_parallel(2)
        .build();
    manager.register_phase::<Busy>();
    let gauge = manager.context().insert(GAUGE, Gauge::default()).await;

    manager.apply_phase::<Busy>(None, true).await.unwrap();

    assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
    assert_eq!(gauge.current.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_phase_lock_serializes_across_hosts() {
    let mut manager = abc();
    manager.register_phase::<Exclusive>();
    let gauge = manager.context().insert(GAUGE, Gauge::default()).await;

    manager.apply_phase::<Exclusive>(None, true).await.unwrap();

    assert_eq!(gauge.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unregistered_phase_is_rejected() {
    let manager = abc();

    let err = manager.apply_phase::<Busy>(None, true).await.unwrap_err();

    assert!(matches!(err, ClusterError::PhaseNotRegistered("Busy")));
}

#[tokio::test]
async fn test_missing_context_is_a_contract_error() {
    let mut manager = abc();
    manager.register_phase::<NeedsKube>();
    let master = manager.master_hosts();

    let err = manager
        .apply_phase::<NeedsKube>(Some(master.as_slice()), false)
        .await
        .unwrap_err();

    let ClusterError::PhaseFailed { failures, .. } = err else {
        panic!("expected PhaseFailed");
    };
    let cause = failures[0].error.downcast_ref::<ClusterError>().unwrap();
    assert!(matches!(
        cause,
        ClusterError::MissingContext { phase: "Needs kube", key } if key == "kube_client"
    ));
}

#[tokio::test]
async fn test_unknown_host_lookup() {
    let manager = abc();
    assert!(matches!(
        manager.host("z"),
        Err(ClusterError::UnknownHost(name)) if name == "z"
    ));
}

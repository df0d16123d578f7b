#![allow(dead_code)]
//! Shared harness for controller integration tests: an in-memory store, a
//! scriptable cluster service double, and a stub asset subsystem.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

use conveyor::cluster::{ClusterService, ModeratorCheck, NodeInfo, NotifyPayload};
use conveyor::error::ClusterError;
use conveyor::events::{AssetReply, AssetVerifyRequest, EventBus};
use conveyor::lifecycle::{ExecutionService, JobValidator};
use conveyor::model::{ConnectionMap, ConnectionRef, ExId, JobId, JobSpec};
use conveyor::status::{ClusterMessage, ExecutionStatus};
use conveyor::store::MemoryBackend;
use conveyor::{Controller, ControllerConfig, CoreDeps};

/// Cluster service double with scriptable capacity and failures. Records
/// every allocation, notification, and moderator query for assertions.
pub struct MockCluster {
    pub workers: AtomicUsize,
    pub fail_slicer: AtomicBool,
    pub fail_workers: AtomicBool,
    pub moderator_can_run: AtomicBool,
    pub nodes: Mutex<Vec<NodeInfo>>,
    pub slicer_allocations: Mutex<Vec<(ExId, bool)>>,
    pub worker_allocations: Mutex<Vec<(ExId, u32)>>,
    pub notifications: Mutex<Vec<(String, ClusterMessage, ExId)>>,
    pub moderator_queries: Mutex<Vec<ConnectionMap>>,
}

impl MockCluster {
    pub fn new(workers: usize) -> Arc<Self> {
        Arc::new(Self {
            workers: AtomicUsize::new(workers),
            fail_slicer: AtomicBool::new(false),
            fail_workers: AtomicBool::new(false),
            moderator_can_run: AtomicBool::new(true),
            nodes: Mutex::new(vec![NodeInfo::new("node-1"), NodeInfo::new("node-2")]),
            slicer_allocations: Mutex::new(Vec::new()),
            worker_allocations: Mutex::new(Vec::new()),
            notifications: Mutex::new(Vec::new()),
            moderator_queries: Mutex::new(Vec::new()),
        })
    }

    pub fn set_workers(&self, count: usize) {
        self.workers.store(count, Ordering::SeqCst);
    }

    pub fn set_moderator(&self, can_run: bool) {
        self.moderator_can_run.store(can_run, Ordering::SeqCst);
    }

    pub fn slicer_allocations(&self) -> Vec<(ExId, bool)> {
        self.slicer_allocations.lock().unwrap().clone()
    }

    pub fn notifications(&self) -> Vec<(String, ClusterMessage, ExId)> {
        self.notifications.lock().unwrap().clone()
    }

    pub fn moderator_queries(&self) -> Vec<ConnectionMap> {
        self.moderator_queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl ClusterService for MockCluster {
    async fn available_workers(&self) -> Result<usize, ClusterError> {
        Ok(self.workers.load(Ordering::SeqCst))
    }

    async fn allocate_slicer(
        &self,
        ex: &conveyor::ExecutionRecord,
        recover: bool,
    ) -> Result<(), ClusterError> {
        self.slicer_allocations
            .lock()
            .unwrap()
            .push((ex.ex_id.clone(), recover));
        if self.fail_slicer.load(Ordering::SeqCst) {
            return Err(ClusterError("no slicer slot available".to_string()));
        }
        Ok(())
    }

    async fn allocate_workers(
        &self,
        ex: &conveyor::ExecutionRecord,
        count: u32,
    ) -> Result<(), ClusterError> {
        self.worker_allocations
            .lock()
            .unwrap()
            .push((ex.ex_id.clone(), count));
        if self.fail_workers.load(Ordering::SeqCst) {
            return Err(ClusterError("worker pool exhausted".to_string()));
        }
        Ok(())
    }

    async fn find_nodes_for_job(
        &self,
        _ex_id: &ExId,
        slicer_only: bool,
    ) -> Result<Vec<NodeInfo>, ClusterError> {
        let nodes = self.nodes.lock().unwrap().clone();
        if slicer_only {
            // First node hosts the slicer.
            Ok(nodes.into_iter().take(1).collect())
        } else {
            Ok(nodes)
        }
    }

    async fn notify_node(
        &self,
        node_id: &str,
        message: ClusterMessage,
        payload: NotifyPayload,
    ) -> Result<(), ClusterError> {
        self.notifications
            .lock()
            .unwrap()
            .push((node_id.to_string(), message, payload.ex_id));
        Ok(())
    }

    async fn check_moderator(
        &self,
        connections: &ConnectionMap,
    ) -> Result<Vec<ModeratorCheck>, ClusterError> {
        self.moderator_queries.lock().unwrap().push(connections.clone());
        let can_run = self.moderator_can_run.load(Ordering::SeqCst);
        let mut checks = Vec::new();
        for (conn_type, names) in connections.iter() {
            for name in names {
                checks.push(ModeratorCheck {
                    can_run,
                    connection: Some(ConnectionRef::new(conn_type.clone(), name.clone())),
                });
            }
        }
        Ok(checks)
    }
}

pub struct AcceptAll;

impl JobValidator for AcceptAll {
    fn validate(&self, _spec: &JobSpec) -> Result<(), String> {
        Ok(())
    }
}

pub struct RejectAll(pub String);

impl JobValidator for RejectAll {
    fn validate(&self, _spec: &JobSpec) -> Result<(), String> {
        Err(self.0.clone())
    }
}

/// Answers asset-verification requests by suffixing each name with a fake
/// content hash.
pub fn spawn_asset_service(mut requests: mpsc::UnboundedReceiver<AssetVerifyRequest>) {
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let resolved = request
                .assets
                .iter()
                .map(|name| format!("{name}-v1-abc123"))
                .collect();
            let _ = request.reply.send(AssetReply {
                assets: Some(resolved),
                error: None,
            });
        }
    });
}

/// Fully wired controller over in-memory storage with fast ticks.
pub struct TestContext {
    pub controller: Controller,
    pub service: Arc<ExecutionService>,
    pub bus: EventBus,
    pub cluster: Arc<MockCluster>,
    pub backend: Arc<MemoryBackend>,
}

pub fn test_config() -> ControllerConfig {
    ControllerConfig::new("test-cluster")
        .with_state_connection("state-primary")
        .with_allocator_tick(Duration::from_millis(20))
}

/// Opt-in test logging: `RUST_LOG=conveyor=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

/// Build a context without wiring the asset subsystem; the caller owns the
/// request stream.
pub fn build_context(
    cluster: Arc<MockCluster>,
    backend: Arc<MemoryBackend>,
    validator: Arc<dyn JobValidator>,
) -> (TestContext, mpsc::UnboundedReceiver<AssetVerifyRequest>) {
    init_tracing();
    let deps = CoreDeps {
        backend: backend.clone(),
        cluster: cluster.clone(),
        validator,
        config: test_config(),
    };
    let (controller, bus, assets) = Controller::new(deps);
    let service = controller.service();
    (
        TestContext {
            controller,
            service,
            bus,
            cluster,
            backend,
        },
        assets,
    )
}

pub fn test_context(cluster: Arc<MockCluster>) -> TestContext {
    let (ctx, assets) = build_context(
        cluster,
        Arc::new(MemoryBackend::new()),
        Arc::new(AcceptAll),
    );
    spawn_asset_service(assets);
    ctx
}

pub fn test_context_with_backend(
    cluster: Arc<MockCluster>,
    backend: Arc<MemoryBackend>,
) -> TestContext {
    let (ctx, assets) = build_context(cluster, backend, Arc::new(AcceptAll));
    spawn_asset_service(assets);
    ctx
}

pub fn job_spec(name: &str, workers: u32) -> JobSpec {
    JobSpec {
        name: name.to_string(),
        lifecycle: Default::default(),
        workers,
        operations: vec![json!({"_op": "reader"}), json!({"_op": "noop"})],
        assets: None,
        moderator: None,
    }
}

pub async fn latest_ex(service: &ExecutionService, job_id: &JobId) -> ExId {
    service
        .get_latest_execution(job_id, false)
        .await
        .expect("latest execution lookup")
        .expect("job has at least one execution")
}

pub async fn wait_for_status(service: &ExecutionService, ex_id: &ExId, status: ExecutionStatus) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = service
            .get_execution_context(ex_id)
            .await
            .ok()
            .map(|ex| ex.status);
        if current == Some(status) {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {ex_id} to reach {status}, last saw {current:?}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_slicer_allocations(cluster: &MockCluster, count: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let seen = cluster.slicer_allocations.lock().unwrap().len();
        if seen >= count {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {count} slicer allocations, saw {seen}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub async fn wait_for_held_len(service: &ExecutionService, len: usize) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let current = service.held_executions().await.len();
        if current == len {
            return;
        }
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for held queue length {len}, saw {current}");
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::allocator::Allocator;
use crate::cluster::ClusterService;
use crate::config::ControllerConfig;
use crate::error::{CoreError, Result, StoreError};
use crate::events::{self, AssetVerifyRequest, CoreEvent, EventBus};
use crate::lifecycle::{ExecutionService, JobValidator};
use crate::model::RecordContext;
use crate::moderator::ModeratorGate;
use crate::status::{ExecutionStatus, ACTIVE_STATUSES};
use crate::store::backend::{SortSpec, StoreBackend};
use crate::store::query::QueryExpr;
use crate::store::state::StateStorage;

/// Everything the core needs injected from the deployment.
pub struct CoreDeps {
    pub backend: Arc<dyn StoreBackend>,
    pub cluster: Arc<dyn ClusterService>,
    pub validator: Arc<dyn JobValidator>,
    pub config: ControllerConfig,
}

/// Owns the lifecycle service, the allocator loop, and the event router.
pub struct Controller {
    service: Arc<ExecutionService>,
    config: ControllerConfig,
    cancel: CancellationToken,
    events_rx: Option<mpsc::UnboundedReceiver<CoreEvent>>,
    handles: Vec<JoinHandle<()>>,
}

impl Controller {
    /// Build the controller. Returns the event bus handle for transports
    /// and cluster listeners, and the asset-request stream for the asset
    /// subsystem.
    pub fn new(deps: CoreDeps) -> (Self, EventBus, mpsc::UnboundedReceiver<AssetVerifyRequest>) {
        let (bus, streams) = events::channel();
        let store = StateStorage::new(deps.backend, &deps.config.cluster_name);
        let gate = ModeratorGate::new(deps.cluster.clone(), deps.config.state_connection.as_str());
        let service = Arc::new(ExecutionService::new(
            store,
            deps.cluster,
            deps.validator,
            gate,
            bus.clone(),
        ));
        let controller = Self {
            service,
            config: deps.config,
            cancel: CancellationToken::new(),
            events_rx: Some(streams.events),
            handles: Vec::new(),
        };
        (controller, bus, streams.assets)
    }

    pub fn service(&self) -> Arc<ExecutionService> {
        self.service.clone()
    }

    /// Reconstitute the admission queue from persisted state.
    ///
    /// Executions that were `running` at the previous shutdown are left in
    /// place. TODO: re-verify them against the live cluster once it can
    /// answer whether a slicer survived.
    pub async fn initialize(&self) -> Result<()> {
        let running = match self
            .service
            .store()
            .executions_with_status(&[ExecutionStatus::Running])
            .await
        {
            Ok(records) => records,
            Err(CoreError::Storage(StoreError::MissingIndex)) => {
                tracing::info!("state index missing; assuming fresh cluster");
                return Ok(());
            }
            Err(e) => return Err(e),
        };
        for ex in &running {
            tracing::warn!(ex_id = %ex.ex_id, "execution was running at last shutdown; leaving in place");
        }

        let pending = self
            .service
            .store()
            .search_executions(
                QueryExpr::and(vec![
                    QueryExpr::context(RecordContext::Ex),
                    QueryExpr::status(ExecutionStatus::Pending),
                ]),
                0,
                self.config.bootstrap_page_size,
                Some(&SortSpec::asc("_created")),
            )
            .await?;
        let recovered = pending.len();
        for ex in pending {
            self.service.enqueue_pending(ex).await;
        }
        tracing::info!(recovered, "admission queue reconstituted");
        Ok(())
    }

    /// Spawn the allocator loop and event router. Idempotent.
    pub fn start(&mut self) {
        let Some(events_rx) = self.events_rx.take() else {
            return;
        };
        self.handles.push(tokio::spawn(run_router(
            self.service.clone(),
            events_rx,
            self.cancel.clone(),
        )));
        let allocator = Allocator::new(self.service.clone(), self.config.allocator_tick);
        self.handles
            .push(tokio::spawn(allocator.run(self.cancel.clone())));
        tracing::info!(cluster = %self.config.cluster_name, "controller started");
    }

    /// Stop scheduling, terminalize every active execution, and close the
    /// store.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();
        for handle in self.handles.drain(..) {
            let _ = handle.await;
        }

        let actives = match self
            .service
            .store()
            .executions_with_status(ACTIVE_STATUSES)
            .await
        {
            Ok(records) => records,
            Err(CoreError::Storage(StoreError::MissingIndex)) => Vec::new(),
            Err(e) => {
                tracing::error!(error = %e, "could not list active executions at shutdown");
                Vec::new()
            }
        };
        tracing::info!(count = actives.len(), "terminalizing active executions");
        for ex in &actives {
            self.service.terminalize(ex).await;
        }

        // The store closes regardless of per-execution errors.
        self.service.store().close().await
    }
}

/// Dispatches cluster events to lifecycle transitions. Handlers log at this
/// boundary; the loop never crashes on a bad event.
async fn run_router(
    service: Arc<ExecutionService>,
    mut events: mpsc::UnboundedReceiver<CoreEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
        };
        if let Err(e) = dispatch(&service, event).await {
            tracing::error!(error = %e, "event handler failed");
        }
    }
    tracing::debug!("event router stopped");
}

async fn dispatch(service: &ExecutionService, event: CoreEvent) -> Result<()> {
    match event {
        CoreEvent::SlicerInitialized { ex_id } => {
            service.handle_slicer_initialized(&ex_id).await
        }
        CoreEvent::JobFinished { ex_id, slicer_stats } => {
            service.handle_job_finished(&ex_id, slicer_stats).await
        }
        CoreEvent::JobFailure {
            ex_id,
            reason,
            slicer_stats,
        } => {
            service
                .handle_execution_failure(&ex_id, reason, slicer_stats)
                .await
        }
        CoreEvent::SlicerFailure {
            ex_id,
            reason,
            slicer_stats,
        } => {
            service
                .handle_execution_failure(&ex_id, reason, slicer_stats)
                .await
        }
        CoreEvent::ProcessingError { ex_id } => service.handle_processing_error(&ex_id).await,
        CoreEvent::PipelineUpdate { ex_id, operations } => {
            service.handle_pipeline_update(&ex_id, operations).await
        }
        CoreEvent::CleanupJob { ex_id, node_id } => {
            service.handle_cleanup_job(&ex_id, &node_id).await
        }
        CoreEvent::ModerationPause { connections } => {
            service.handle_moderation_pause(&connections).await
        }
        CoreEvent::ModerationResume { connections } => {
            service.handle_moderation_resume(&connections).await
        }
    }
}

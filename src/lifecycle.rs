use std::sync::Arc;

use futures::future::try_join_all;
use serde_json::Value;
use tokio::sync::{Notify, RwLock};

use crate::cluster::{ClusterService, NotifyPayload};
use crate::error::{ClusterError, CoreError, Result};
use crate::events::EventBus;
use crate::model::{
    ConnectionRef, ErrorsFlag, ExId, ExecutionPatch, ExecutionRecord, JobId, JobRecord, JobSpec,
    JobUpdate,
};
use crate::moderator::ModeratorGate;
use crate::queue::AdmissionQueue;
use crate::status::{ExecutionStatus, NotifyCommand};
use crate::store::state::StateStorage;

/// Validates a job spec before admission. Pure; supplied by the deployment.
pub trait JobValidator: Send + Sync {
    fn validate(&self, spec: &JobSpec) -> std::result::Result<(), String>;
}

/// Drives every execution through its lifecycle.
///
/// All record mutation flows through this service. The admission queues hold
/// the in-memory projection; the store keeps the authoritative status.
pub struct ExecutionService {
    store: StateStorage,
    pub(crate) cluster: Arc<dyn ClusterService>,
    validator: Arc<dyn JobValidator>,
    gate: ModeratorGate,
    bus: EventBus,
    pub(crate) pending: RwLock<AdmissionQueue>,
    pub(crate) moderator_held: RwLock<AdmissionQueue>,
    pub(crate) allocator_wake: Notify,
}

impl ExecutionService {
    pub(crate) fn new(
        store: StateStorage,
        cluster: Arc<dyn ClusterService>,
        validator: Arc<dyn JobValidator>,
        gate: ModeratorGate,
        bus: EventBus,
    ) -> Self {
        Self {
            store,
            cluster,
            validator,
            gate,
            bus,
            pending: RwLock::new(AdmissionQueue::new()),
            moderator_held: RwLock::new(AdmissionQueue::new()),
            allocator_wake: Notify::new(),
        }
    }

    pub fn store(&self) -> &StateStorage {
        &self.store
    }

    /// Validate, persist, and optionally admit a new job. Returns the job
    /// id; callers look up the latest execution when they need its id.
    pub async fn submit_job(&self, spec: JobSpec, should_run: bool) -> Result<JobId> {
        let resolved_assets = self.resolve_assets(spec.assets.as_deref()).await?;
        let mut resolved_spec = spec.clone();
        if resolved_assets.is_some() {
            resolved_spec.assets = resolved_assets.clone();
        }
        self.validator
            .validate(&resolved_spec)
            .map_err(CoreError::Validation)?;

        // The job keeps the human-readable asset names; the resolved ids
        // travel with the execution.
        let job = self.store.create_job(spec).await?;
        tracing::info!(job_id = %job.job_id, name = %job.spec.name, "job submitted");
        if !should_run {
            return Ok(job.job_id);
        }
        self.create_execution(&job, resolved_assets).await
    }

    /// Start a fresh execution of a persisted job.
    pub async fn start_job(&self, job_id: &JobId) -> Result<JobId> {
        let job = self.store.get_job(job_id).await?;
        let resolved_assets = self.resolve_assets(job.spec.assets.as_deref()).await?;
        self.create_execution(&job, resolved_assets).await
    }

    /// Persist an execution for `job` and admit it through the moderator
    /// gate.
    pub async fn create_execution(
        &self,
        job: &JobRecord,
        resolved_assets: Option<Vec<String>>,
    ) -> Result<JobId> {
        let ex = self.store.create_execution(job, resolved_assets).await?;
        // First durable lifecycle transition and the moderator consult run
        // concurrently; both must succeed.
        let (_, admitted) = tokio::try_join!(
            self.set_status(&ex.ex_id, ExecutionStatus::Pending, ExecutionPatch::default()),
            self.gate.can_run(ex.moderator.as_ref()),
        )?;
        if admitted {
            self.enqueue_pending(ex).await;
        } else {
            tracing::info!(ex_id = %ex.ex_id, "execution held by moderator");
            self.moderator_held.write().await.enqueue(ex);
        }
        Ok(job.job_id.clone())
    }

    pub(crate) async fn enqueue_pending(&self, ex: ExecutionRecord) {
        tracing::debug!(ex_id = %ex.ex_id, "execution enqueued");
        self.pending.write().await.enqueue(ex);
        self.allocator_wake.notify_one();
    }

    /// Re-enqueue an execution for recovery. No moderator re-check and no
    /// status write; the allocator moves it to `scheduling` on pickup.
    pub async fn restart_execution(&self, ex_id: &ExId) -> Result<()> {
        let mut ex = self.store.get_execution(ex_id).await?;
        match ex.status {
            ExecutionStatus::Completed => {
                return Err(CoreError::CompletedNotRestartable(ex_id.clone()))
            }
            ExecutionStatus::Scheduling => {
                return Err(CoreError::AlreadyScheduling(ex_id.clone()))
            }
            _ => {}
        }
        ex.recover_execution = true;
        tracing::info!(ex_id = %ex_id, status = %ex.status, "execution re-enqueued for recovery");
        self.enqueue_pending(ex).await;
        Ok(())
    }

    /// Fan `command` out to the nodes running `ex_id`, then write the
    /// command's target status. Returns the resulting status.
    pub async fn notify(&self, ex_id: &ExId, command: NotifyCommand) -> Result<ExecutionStatus> {
        let (message, target) = command.cluster_message();
        let nodes = self
            .cluster
            .find_nodes_for_job(ex_id, target.slicer_only())
            .await?;
        try_join_all(nodes.iter().map(|node| {
            self.cluster.notify_node(
                &node.node_id,
                message,
                NotifyPayload {
                    ex_id: ex_id.clone(),
                },
            )
        }))
        .await
        .map_err(|e| ClusterError(format!("notifying nodes for {ex_id}: {e}")))?;
        tracing::info!(ex_id = %ex_id, command = %command, nodes = nodes.len(), "command delivered");

        let ex = self.store.get_execution(ex_id).await?;
        match command.target_status() {
            Some(status) => {
                self.set_status(&ex.ex_id, status, ExecutionPatch::default())
                    .await?;
                Ok(status)
            }
            None => Ok(ex.status),
        }
    }

    /// Durable status write; metadata merges alongside `_status`.
    pub async fn set_status(
        &self,
        ex_id: &ExId,
        status: ExecutionStatus,
        mut patch: ExecutionPatch,
    ) -> Result<()> {
        patch.status = Some(status);
        self.store.update_execution(ex_id, patch).await?;
        tracing::debug!(ex_id = %ex_id, status = %status, "status written");
        Ok(())
    }

    /// Resolve human asset names to content ids via the asset subsystem.
    async fn resolve_assets(&self, assets: Option<&[String]>) -> Result<Option<Vec<String>>> {
        let Some(assets) = assets else {
            return Ok(None);
        };
        if assets.is_empty() {
            return Ok(None);
        }
        let reply = self.bus.verify_assets(assets.to_vec()).await?;
        if let Some(error) = reply.error {
            return Err(CoreError::AssetResolution(error));
        }
        let resolved = reply
            .assets
            .ok_or_else(|| CoreError::AssetResolution("asset service returned no assets".to_string()))?;
        if resolved.len() != assets.len() {
            return Err(CoreError::AssetResolution(format!(
                "expected {} assets, resolved {}",
                assets.len(),
                resolved.len()
            )));
        }
        Ok(Some(resolved))
    }

    // --- event-driven transitions ---

    pub(crate) async fn handle_slicer_initialized(&self, ex_id: &ExId) -> Result<()> {
        self.set_status(ex_id, ExecutionStatus::Running, ExecutionPatch::default())
            .await
    }

    pub(crate) async fn handle_job_finished(&self, ex_id: &ExId, stats: Value) -> Result<()> {
        let ex = self.store.get_execution(ex_id).await?;
        let patch = ExecutionPatch {
            slicer_stats: Some(stats),
            has_errors: ex.recover_execution.then_some(ErrorsFlag::Recovered),
            ..Default::default()
        };
        self.set_status(ex_id, ExecutionStatus::Completed, patch).await
    }

    /// Terminal failure, whether reported for the job or its slicer.
    pub(crate) async fn handle_execution_failure(
        &self,
        ex_id: &ExId,
        reason: String,
        stats: Option<Value>,
    ) -> Result<()> {
        let patch = ExecutionPatch {
            has_errors: Some(ErrorsFlag::Errored),
            failure_reason: Some(reason),
            slicer_stats: stats,
            ..Default::default()
        };
        self.set_status(ex_id, ExecutionStatus::Failed, patch).await
    }

    pub(crate) async fn handle_processing_error(&self, ex_id: &ExId) -> Result<()> {
        let patch = ExecutionPatch {
            has_errors: Some(ErrorsFlag::Errored),
            ..Default::default()
        };
        self.set_status(ex_id, ExecutionStatus::Failing, patch).await
    }

    pub(crate) async fn handle_pipeline_update(
        &self,
        ex_id: &ExId,
        operations: Vec<Value>,
    ) -> Result<()> {
        let patch = ExecutionPatch {
            operations: Some(operations),
            ..Default::default()
        };
        self.store.update_execution(ex_id, patch).await
    }

    pub(crate) async fn handle_cleanup_job(&self, ex_id: &ExId, node_id: &str) -> Result<()> {
        let ex = self.store.get_execution(ex_id).await?;
        match ex.status {
            ExecutionStatus::Running | ExecutionStatus::Failing | ExecutionStatus::Paused => {
                tracing::info!(ex_id = %ex_id, node_id, "rescheduling execution after node loss");
                self.restart_execution(ex_id).await
            }
            status => {
                tracing::debug!(ex_id = %ex_id, %status, node_id, "ignoring cleanup for execution");
                Ok(())
            }
        }
    }

    pub(crate) async fn handle_moderation_pause(
        &self,
        connections: &[ConnectionRef],
    ) -> Result<()> {
        let candidates = self
            .store
            .executions_with_status(&[ExecutionStatus::Running, ExecutionStatus::Failing])
            .await?;
        for ex in candidates
            .iter()
            .filter(|ex| touches_any(ex, connections))
        {
            if let Err(e) = self.notify(&ex.ex_id, NotifyCommand::ModeratorPaused).await {
                tracing::error!(ex_id = %ex.ex_id, error = %e, "failed to moderator-pause execution");
            }
        }
        Ok(())
    }

    pub(crate) async fn handle_moderation_resume(
        &self,
        connections: &[ConnectionRef],
    ) -> Result<()> {
        // Re-check everything the moderator was holding.
        let held = self.moderator_held.write().await.drain();
        let mut released = Vec::new();
        let mut still_held = Vec::new();
        for ex in held {
            match self.gate.can_run(ex.moderator.as_ref()).await {
                Ok(true) => released.push(ex),
                Ok(false) => still_held.push(ex),
                Err(e) => {
                    tracing::warn!(ex_id = %ex.ex_id, error = %e, "moderator re-check failed; keeping hold");
                    still_held.push(ex);
                }
            }
        }
        {
            let mut held_queue = self.moderator_held.write().await;
            for ex in still_held {
                held_queue.enqueue(ex);
            }
        }
        if !released.is_empty() {
            // Released executions jump ahead of never-held ones, preserving
            // their relative order.
            let mut pending = self.pending.write().await;
            for ex in released.into_iter().rev() {
                tracing::info!(ex_id = %ex.ex_id, "moderator released execution");
                pending.enqueue_front(ex);
            }
            drop(pending);
            self.allocator_wake.notify_one();
        }

        // Resume executions the pause handler parked.
        let paused = self
            .store
            .executions_with_status(&[ExecutionStatus::ModeratorPaused])
            .await?;
        for ex in paused.iter().filter(|ex| touches_any(ex, connections)) {
            if let Err(e) = self.notify(&ex.ex_id, NotifyCommand::Resume).await {
                tracing::error!(ex_id = %ex.ex_id, error = %e, "failed to resume moderator-paused execution");
            }
        }
        Ok(())
    }

    /// Stop-notify the nodes and write `terminated`, which distinguishes a
    /// controller-initiated shutdown from a user stop. Best-effort: the
    /// status write happens even when notification fails.
    pub(crate) async fn terminalize(&self, ex: &ExecutionRecord) {
        let (message, target) = NotifyCommand::Terminated.cluster_message();
        match self
            .cluster
            .find_nodes_for_job(&ex.ex_id, target.slicer_only())
            .await
        {
            Ok(nodes) => {
                for node in nodes {
                    if let Err(e) = self
                        .cluster
                        .notify_node(
                            &node.node_id,
                            message,
                            NotifyPayload {
                                ex_id: ex.ex_id.clone(),
                            },
                        )
                        .await
                    {
                        tracing::warn!(ex_id = %ex.ex_id, node_id = %node.node_id, error = %e, "stop notification failed");
                    }
                }
            }
            Err(e) => {
                tracing::warn!(ex_id = %ex.ex_id, error = %e, "could not find nodes to stop");
            }
        }
        if let Err(e) = self
            .set_status(&ex.ex_id, ExecutionStatus::Terminated, ExecutionPatch::default())
            .await
        {
            tracing::error!(ex_id = %ex.ex_id, error = %e, "failed to terminalize execution");
        }
    }

    // --- read and update surface ---

    pub async fn get_job(&self, job_id: &JobId) -> Result<JobRecord> {
        self.store.get_job(job_id).await
    }

    pub async fn get_jobs(&self, from: usize, size: usize) -> Result<Vec<JobRecord>> {
        self.store.get_jobs(from, size).await
    }

    pub async fn update_job(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord> {
        self.store.update_job(job_id, update).await
    }

    pub async fn update_execution(&self, ex_id: &ExId, patch: ExecutionPatch) -> Result<()> {
        self.store.update_execution(ex_id, patch).await
    }

    pub async fn get_execution_context(&self, ex_id: &ExId) -> Result<ExecutionRecord> {
        self.store.get_execution(ex_id).await
    }

    pub async fn get_execution_contexts(
        &self,
        status: Option<ExecutionStatus>,
        from: usize,
        size: usize,
    ) -> Result<Vec<ExecutionRecord>> {
        use crate::store::backend::SortSpec;
        use crate::store::query::QueryExpr;

        let mut clauses = vec![QueryExpr::context(crate::model::RecordContext::Ex)];
        if let Some(status) = status {
            clauses.push(QueryExpr::status(status));
        }
        self.store
            .search_executions(
                QueryExpr::and(clauses),
                from,
                size,
                Some(&SortSpec::asc("_created")),
            )
            .await
    }

    pub async fn get_executions(&self, job_id: &JobId) -> Result<Vec<ExecutionRecord>> {
        self.store.executions_for_job(job_id).await
    }

    /// Id of the most recently created execution of a job. With
    /// `only_if_active`, `None` means no active execution; without it, a job
    /// with no executions is `NotFound`.
    pub async fn get_latest_execution(
        &self,
        job_id: &JobId,
        only_if_active: bool,
    ) -> Result<Option<ExId>> {
        match self.store.latest_execution(job_id, only_if_active).await? {
            Some(ex) => Ok(Some(ex.ex_id)),
            None if only_if_active => Ok(None),
            None => Err(CoreError::NotFound(format!("no executions for job {job_id}"))),
        }
    }

    /// Ids currently queued for allocation, front first.
    pub async fn pending_executions(&self) -> Vec<ExId> {
        self.pending
            .read()
            .await
            .iter()
            .map(|ex| ex.ex_id.clone())
            .collect()
    }

    /// Ids currently held by the moderator, front first.
    pub async fn held_executions(&self) -> Vec<ExId> {
        self.moderator_held
            .read()
            .await
            .iter()
            .map(|ex| ex.ex_id.clone())
            .collect()
    }
}

fn touches_any(ex: &ExecutionRecord, connections: &[ConnectionRef]) -> bool {
    ex.moderator
        .as_ref()
        .is_some_and(|declared| connections.iter().any(|conn| declared.touches(conn)))
}

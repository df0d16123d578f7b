use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::lifecycle::ExecutionService;
use crate::model::ExecutionPatch;
use crate::status::ExecutionStatus;

/// Slicer plus at least one worker; lower capacity defers scheduling.
const MIN_WORKERS_TO_SCHEDULE: usize = 2;

/// Single-consumer allocation loop.
///
/// One task owns the drain, so at most one allocation is ever in flight.
/// Wakes on every enqueue; the periodic tick is a safety net for capacity
/// changes the cluster does not announce.
pub(crate) struct Allocator {
    service: Arc<ExecutionService>,
    tick: Duration,
}

impl Allocator {
    pub(crate) fn new(service: Arc<ExecutionService>, tick: Duration) -> Self {
        Self { service, tick }
    }

    pub(crate) async fn run(self, cancel: CancellationToken) {
        let mut tick = tokio::time::interval(self.tick);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = self.service.allocator_wake.notified() => {}
                _ = tick.tick() => {}
            }
            while self.allocate_next().await {}
        }
        tracing::debug!("allocator stopped");
    }

    /// Attempt one allocation. Returns true when the loop should keep
    /// draining.
    async fn allocate_next(&self) -> bool {
        if self.service.pending.read().await.is_empty() {
            return false;
        }
        let available = match self.service.cluster.available_workers().await {
            Ok(count) => count,
            Err(e) => {
                tracing::warn!(error = %e, "could not read cluster capacity");
                return false;
            }
        };
        if available < MIN_WORKERS_TO_SCHEDULE {
            tracing::debug!(available, "deferring scheduling until workers free up");
            return false;
        }
        let Some(ex) = self.service.pending.write().await.dequeue() else {
            return false;
        };
        let recover = ex.recover_execution;
        tracing::info!(ex_id = %ex.ex_id, recover, "allocating execution");

        // Persist the recover flag with the scheduling write so completion
        // handlers can observe a recovered run.
        let patch = ExecutionPatch {
            recover_execution: recover.then_some(true),
            ..Default::default()
        };
        if let Err(e) = self
            .service
            .set_status(&ex.ex_id, ExecutionStatus::Scheduling, patch)
            .await
        {
            tracing::error!(ex_id = %ex.ex_id, error = %e, "failed to mark scheduling; will retry");
            self.service.pending.write().await.enqueue_front(ex);
            return false;
        }

        if let Err(e) = self.service.cluster.allocate_slicer(&ex, recover).await {
            tracing::error!(ex_id = %ex.ex_id, error = %e, "slicer allocation failed");
            let patch = ExecutionPatch {
                failure_reason: Some(e.to_string()),
                ..Default::default()
            };
            if let Err(e) = self
                .service
                .set_status(&ex.ex_id, ExecutionStatus::Failed, patch)
                .await
            {
                tracing::error!(ex_id = %ex.ex_id, error = %e, "failed to record slicer failure");
            }
            return true;
        }

        if let Err(e) = self
            .service
            .set_status(&ex.ex_id, ExecutionStatus::Initializing, ExecutionPatch::default())
            .await
        {
            tracing::error!(ex_id = %ex.ex_id, error = %e, "failed to mark initializing");
            return true;
        }

        // Worker-allocation failure leaves the execution in `initializing`;
        // cluster events advance or fail it from here.
        if let Err(e) = self.service.cluster.allocate_workers(&ex, ex.workers).await {
            tracing::warn!(ex_id = %ex.ex_id, error = %e, "worker allocation failed; awaiting cluster events");
        }
        true
    }
}

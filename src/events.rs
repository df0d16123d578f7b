use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{CoreError, Result};
use crate::model::{ConnectionRef, ExId};

/// Events the controller consumes from the rest of the cluster.
#[derive(Debug, Clone)]
pub enum CoreEvent {
    /// The allocated slicer reported readiness.
    SlicerInitialized { ex_id: ExId },
    /// The execution ran to completion.
    JobFinished { ex_id: ExId, slicer_stats: Value },
    /// The execution failed as a whole.
    JobFailure {
        ex_id: ExId,
        reason: String,
        slicer_stats: Option<Value>,
    },
    /// The execution's slicer died.
    SlicerFailure {
        ex_id: ExId,
        reason: String,
        slicer_stats: Option<Value>,
    },
    /// The slicer reported a processing error; the terminal failure arrives
    /// separately as `JobFailure`.
    ProcessingError { ex_id: ExId },
    /// The slicer published an updated pipeline snapshot.
    PipelineUpdate { ex_id: ExId, operations: Vec<Value> },
    /// A node disconnected and its execution needs rescheduling.
    CleanupJob { ex_id: ExId, node_id: String },
    /// The moderator throttled the listed connections.
    ModerationPause { connections: Vec<ConnectionRef> },
    /// The moderator released the listed connections.
    ModerationResume { connections: Vec<ConnectionRef> },
}

/// Reply to an asset-verification request.
#[derive(Debug)]
pub struct AssetReply {
    pub assets: Option<Vec<String>>,
    pub error: Option<String>,
}

/// Request for the asset subsystem to map human asset names to content ids.
///
/// The one-shot reply channel plays the role of a correlation id: concurrent
/// submissions cannot cross-wire responses. `request_id` survives for log
/// correlation only.
#[derive(Debug)]
pub struct AssetVerifyRequest {
    pub request_id: String,
    pub assets: Vec<String>,
    pub reply: oneshot::Sender<AssetReply>,
}

/// Sending half of the process-wide event surface. Cheap to clone; handed to
/// transports and cluster listeners.
#[derive(Clone)]
pub struct EventBus {
    events: mpsc::UnboundedSender<CoreEvent>,
    assets: mpsc::UnboundedSender<AssetVerifyRequest>,
}

/// Receiving half: `events` feeds the controller's router, `assets` is
/// consumed by the asset subsystem.
pub struct EventStreams {
    pub events: mpsc::UnboundedReceiver<CoreEvent>,
    pub assets: mpsc::UnboundedReceiver<AssetVerifyRequest>,
}

pub fn channel() -> (EventBus, EventStreams) {
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let (assets_tx, assets_rx) = mpsc::unbounded_channel();
    (
        EventBus {
            events: events_tx,
            assets: assets_tx,
        },
        EventStreams {
            events: events_rx,
            assets: assets_rx,
        },
    )
}

impl EventBus {
    /// Publish a cluster event to the router.
    pub fn emit(&self, event: CoreEvent) {
        if self.events.send(event).is_err() {
            tracing::warn!("event dropped: controller event loop has shut down");
        }
    }

    /// Ask the asset subsystem to resolve names to content ids and await the
    /// reply.
    pub async fn verify_assets(&self, assets: Vec<String>) -> Result<AssetReply> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request_id = Uuid::new_v4().simple().to_string();
        tracing::debug!(request_id = %request_id, count = assets.len(), "verifying assets");
        self.assets
            .send(AssetVerifyRequest {
                request_id,
                assets,
                reply: reply_tx,
            })
            .map_err(|_| CoreError::AssetResolution("asset service unavailable".to_string()))?;
        reply_rx
            .await
            .map_err(|_| CoreError::AssetResolution("asset service dropped the request".to_string()))
    }
}

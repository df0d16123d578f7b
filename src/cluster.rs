use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ClusterError;
use crate::model::{ConnectionMap, ConnectionRef, ExId, ExecutionRecord};
use crate::status::ClusterMessage;

/// A cluster node currently involved in running an execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub node_id: String,
}

impl NodeInfo {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
        }
    }
}

/// One moderator verdict for a declared connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModeratorCheck {
    pub can_run: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<ConnectionRef>,
}

/// Payload attached to a node notification.
#[derive(Debug, Clone, Serialize)]
pub struct NotifyPayload {
    pub ex_id: ExId,
}

/// Capability surface of the cluster the controller schedules onto.
///
/// The controller treats all of this as opaque: allocation mechanics, node
/// discovery, and the moderator live behind whatever transport the
/// deployment wires in.
#[async_trait]
pub trait ClusterService: Send + Sync {
    /// Worker processes currently available for allocation.
    async fn available_workers(&self) -> Result<usize, ClusterError>;

    /// Allocate the slicer for an execution. `recover` asks the slicer to
    /// resume prior state instead of starting fresh.
    async fn allocate_slicer(
        &self,
        ex: &ExecutionRecord,
        recover: bool,
    ) -> Result<(), ClusterError>;

    async fn allocate_workers(
        &self,
        ex: &ExecutionRecord,
        count: u32,
    ) -> Result<(), ClusterError>;

    /// Nodes currently running `ex_id`, restricted to the slicer node when
    /// `slicer_only`.
    async fn find_nodes_for_job(
        &self,
        ex_id: &ExId,
        slicer_only: bool,
    ) -> Result<Vec<NodeInfo>, ClusterError>;

    async fn notify_node(
        &self,
        node_id: &str,
        message: ClusterMessage,
        payload: NotifyPayload,
    ) -> Result<(), ClusterError>;

    /// Ask the moderator whether the declared connections are below their
    /// throttle limits; one entry per connection.
    async fn check_moderator(
        &self,
        connections: &ConnectionMap,
    ) -> Result<Vec<ModeratorCheck>, ClusterError>;
}

use std::sync::Arc;

use crate::cluster::ClusterService;
use crate::error::Result;
use crate::model::ConnectionMap;

/// Connection type the controller's own state store registers under.
pub const STATE_CONNECTION_TYPE: &str = "elasticsearch";

/// Gates admission on the moderator's view of external-database throttling.
#[derive(Clone)]
pub struct ModeratorGate {
    cluster: Arc<dyn ClusterService>,
    state_connection: String,
}

impl ModeratorGate {
    pub fn new(cluster: Arc<dyn ClusterService>, state_connection: impl Into<String>) -> Self {
        Self {
            cluster,
            state_connection: state_connection.into(),
        }
    }

    /// True when every declared connection is currently below its throttle
    /// limit. Executions with no declared dependencies pass without
    /// consulting the cluster.
    pub async fn can_run(&self, declared: Option<&ConnectionMap>) -> Result<bool> {
        let Some(declared) = declared else {
            return Ok(true);
        };
        if declared.is_empty() {
            return Ok(true);
        }
        let connections = self.with_state_connection(declared);
        let checks = self.cluster.check_moderator(&connections).await?;
        let blocked = checks.iter().filter(|check| !check.can_run).count();
        if blocked > 0 {
            tracing::debug!(blocked, "moderator refused admission");
        }
        Ok(blocked == 0)
    }

    /// Every job is additionally gated on the controller's backing store.
    fn with_state_connection(&self, declared: &ConnectionMap) -> ConnectionMap {
        let mut connections = declared.clone();
        connections.insert_connection(STATE_CONNECTION_TYPE, &self.state_connection);
        connections
    }
}

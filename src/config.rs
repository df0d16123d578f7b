use std::time::Duration;

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Cluster name; the state index name derives from it.
    pub cluster_name: String,
    /// Name of the controller's own backing-store connection. Every job is
    /// gated on its availability.
    pub state_connection: String,
    /// Allocator safety-net tick.
    pub allocator_tick: Duration,
    /// Most pending executions re-enqueued at bootstrap.
    pub bootstrap_page_size: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cluster_name: "conveyor".to_string(),
            state_connection: "default".to_string(),
            allocator_tick: Duration::from_secs(1),
            bootstrap_page_size: 10_000,
        }
    }
}

impl ControllerConfig {
    pub fn new(cluster_name: impl Into<String>) -> Self {
        Self {
            cluster_name: cluster_name.into(),
            ..Default::default()
        }
    }

    pub fn with_state_connection(mut self, connection: impl Into<String>) -> Self {
        self.state_connection = connection.into();
        self
    }

    pub fn with_allocator_tick(mut self, tick: Duration) -> Self {
        self.allocator_tick = tick;
        self
    }

    pub fn with_bootstrap_page_size(mut self, size: usize) -> Self {
        self.bootstrap_page_size = size;
        self
    }
}

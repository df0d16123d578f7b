pub mod cluster;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod lifecycle;
pub mod model;
pub mod moderator;
pub mod queue;
pub mod status;
pub mod store;

mod allocator;

pub use cluster::{ClusterService, ModeratorCheck, NodeInfo, NotifyPayload};
pub use config::ControllerConfig;
pub use controller::{Controller, CoreDeps};
pub use error::{ClusterError, CoreError, Result, StoreError};
pub use events::{AssetReply, AssetVerifyRequest, CoreEvent, EventBus};
pub use lifecycle::{ExecutionService, JobValidator};
pub use model::{
    ConnectionMap, ConnectionRef, ErrorsFlag, ExId, ExecutionPatch, ExecutionRecord, JobId,
    JobLifecycle, JobRecord, JobSpec, JobUpdate,
};
pub use status::{ClusterMessage, ExecutionStatus, NotifyCommand, NotifyTarget};

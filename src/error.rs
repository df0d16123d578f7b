use thiserror::Error;

use crate::model::ExId;

/// Errors surfaced by the document store boundary.
#[derive(Error, Debug)]
pub enum StoreError {
    /// The target index does not exist yet. Tolerated during bootstrap on a
    /// fresh cluster; an error everywhere else.
    #[error("no such index")]
    MissingIndex,

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("malformed record: {0}")]
    Corrupt(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Error from the cluster service boundary (allocation, node notification,
/// moderator checks).
#[derive(Error, Debug)]
#[error("cluster service error: {0}")]
pub struct ClusterError(pub String);

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("job validation failed: {0}")]
    Validation(String),

    #[error("asset resolution failed: {0}")]
    AssetResolution(String),

    #[error("invalid notify command: {0}")]
    InvalidCommand(String),

    #[error("invalid execution status: {0}")]
    InvalidStatus(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("execution {0} has completed and cannot be restarted")]
    CompletedNotRestartable(ExId),

    #[error("execution {0} is already being scheduled")]
    AlreadyScheduling(ExId),

    #[error(transparent)]
    Storage(#[from] StoreError),

    #[error(transparent)]
    Cluster(#[from] ClusterError),
}

pub type Result<T> = std::result::Result<T, CoreError>;

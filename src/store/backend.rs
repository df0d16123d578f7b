use async_trait::async_trait;
use serde_json::Value;

use crate::error::StoreError;
use crate::store::query::QueryExpr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Field sort applied to a search.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub field: String,
    pub order: SortOrder,
}

impl SortSpec {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            order: SortOrder::Desc,
        }
    }
}

/// Opaque KV + query index holding the controller's persisted records.
///
/// Implementations translate `QueryExpr` to their native query language at
/// this boundary. `search` honors `from`/`size` paging up to a ceiling of
/// 10,000 records per call; backends that cannot return that many must
/// document their cap.
#[async_trait]
pub trait StoreBackend: Send + Sync {
    async fn create(&self, index: &str, id: &str, doc: Value) -> Result<(), StoreError>;

    async fn get(&self, index: &str, id: &str) -> Result<Value, StoreError>;

    /// Shallow-merge `partial` into the stored document.
    async fn update(&self, index: &str, id: &str, partial: Value) -> Result<(), StoreError>;

    async fn search(
        &self,
        index: &str,
        query: &QueryExpr,
        from: usize,
        size: usize,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<Value>, StoreError>;

    async fn close(&self) -> Result<(), StoreError>;
}

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::backend::{SortOrder, SortSpec, StoreBackend};
use crate::store::query::{field_as_string, QueryExpr};

/// In-memory document store for tests and single-node development.
///
/// Indexes come into existence on first write; searching an index that was
/// never written fails with `MissingIndex`, matching a fresh cluster.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    indexes: RwLock<HashMap<String, BTreeMap<String, Value>>>,
    closed: AtomicBool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Documents currently held in `index`.
    pub async fn count(&self, index: &str) -> usize {
        self.indexes
            .read()
            .await
            .get(index)
            .map_or(0, BTreeMap::len)
    }

    /// Raw document lookup for assertions. Works even after `close`, which
    /// only fences the `StoreBackend` surface.
    pub async fn document(&self, index: &str, id: &str) -> Option<Value> {
        self.indexes
            .read()
            .await
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.is_closed() {
            return Err(StoreError::Backend("store is closed".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl StoreBackend for MemoryBackend {
    async fn create(&self, index: &str, id: &str, doc: Value) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut indexes = self.indexes.write().await;
        indexes
            .entry(index.to_string())
            .or_default()
            .insert(id.to_string(), doc);
        Ok(())
    }

    async fn get(&self, index: &str, id: &str) -> Result<Value, StoreError> {
        self.ensure_open()?;
        self.indexes
            .read()
            .await
            .get(index)
            .and_then(|docs| docs.get(id))
            .cloned()
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn update(&self, index: &str, id: &str, partial: Value) -> Result<(), StoreError> {
        self.ensure_open()?;
        let mut indexes = self.indexes.write().await;
        let doc = indexes
            .get_mut(index)
            .and_then(|docs| docs.get_mut(id))
            .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        match (doc, partial) {
            (Value::Object(target), Value::Object(fields)) => {
                for (key, value) in fields {
                    target.insert(key, value);
                }
                Ok(())
            }
            _ => Err(StoreError::Backend(
                "update requires object documents".to_string(),
            )),
        }
    }

    async fn search(
        &self,
        index: &str,
        query: &QueryExpr,
        from: usize,
        size: usize,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<Value>, StoreError> {
        self.ensure_open()?;
        let indexes = self.indexes.read().await;
        let docs = indexes
            .get(index)
            .ok_or(StoreError::MissingIndex)?;
        let mut hits: Vec<Value> = docs
            .values()
            .filter(|doc| query.matches(doc))
            .cloned()
            .collect();
        if let Some(sort) = sort {
            hits.sort_by_key(|doc| field_as_string(doc, &sort.field).unwrap_or_default());
            if sort.order == SortOrder::Desc {
                hits.reverse();
            }
        }
        Ok(hits.into_iter().skip(from).take(size).collect())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{CoreError, Result, StoreError};
use crate::model::{
    ExId, ExecutionPatch, ExecutionRecord, JobId, JobRecord, JobSpec, JobUpdate, RecordContext,
};
use crate::status::ExecutionStatus;
use crate::store::backend::{SortSpec, StoreBackend};
use crate::store::query::QueryExpr;

/// Ceiling on a single search, mirroring the document store's page limit.
pub const MAX_SEARCH_SIZE: usize = 10_000;

/// Adapter between typed lifecycle records and the opaque document store.
///
/// Owns id and timestamp assignment: `_created` is set once on create and
/// never modified, `_updated` advances on every mutation. Both record kinds
/// share one index whose name derives from the cluster name.
#[derive(Clone)]
pub struct StateStorage {
    backend: Arc<dyn StoreBackend>,
    index: String,
}

impl StateStorage {
    pub fn new(backend: Arc<dyn StoreBackend>, cluster_name: &str) -> Self {
        Self {
            backend,
            index: format!("{cluster_name}__state"),
        }
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    pub async fn create_job(&self, spec: JobSpec) -> Result<JobRecord> {
        let record = JobRecord::new(spec);
        let doc = to_doc(&record)?;
        self.backend
            .create(&self.index, &record.job_id.to_string(), doc)
            .await?;
        Ok(record)
    }

    pub async fn create_execution(
        &self,
        job: &JobRecord,
        assets: Option<Vec<String>>,
    ) -> Result<ExecutionRecord> {
        let record = ExecutionRecord::from_job(job, assets);
        let doc = to_doc(&record)?;
        self.backend
            .create(&self.index, &record.ex_id.to_string(), doc)
            .await?;
        Ok(record)
    }

    pub async fn get_job(&self, job_id: &JobId) -> Result<JobRecord> {
        let doc = match self.backend.get(&self.index, &job_id.to_string()).await {
            Ok(doc) => doc,
            Err(StoreError::NotFound(_)) => {
                return Err(CoreError::NotFound(format!("job {job_id}")))
            }
            Err(e) => return Err(e.into()),
        };
        let record: JobRecord = from_doc(doc)?;
        if record.context != RecordContext::Job {
            return Err(CoreError::NotFound(format!("job {job_id}")));
        }
        Ok(record)
    }

    pub async fn get_execution(&self, ex_id: &ExId) -> Result<ExecutionRecord> {
        let doc = match self.backend.get(&self.index, &ex_id.to_string()).await {
            Ok(doc) => doc,
            Err(StoreError::NotFound(_)) => {
                return Err(CoreError::NotFound(format!("execution {ex_id}")))
            }
            Err(e) => return Err(e.into()),
        };
        let record: ExecutionRecord = from_doc(doc)?;
        if record.context != RecordContext::Ex {
            return Err(CoreError::NotFound(format!("execution {ex_id}")));
        }
        Ok(record)
    }

    /// Merge `update` into the job record and return the updated job.
    pub async fn update_job(&self, job_id: &JobId, update: JobUpdate) -> Result<JobRecord> {
        let partial = stamped_partial(&update)?;
        match self
            .backend
            .update(&self.index, &job_id.to_string(), partial)
            .await
        {
            Ok(()) => self.get_job(job_id).await,
            Err(StoreError::NotFound(_)) => Err(CoreError::NotFound(format!("job {job_id}"))),
            Err(e) => Err(e.into()),
        }
    }

    /// Merge `patch` into the execution record, bumping `_updated`.
    pub async fn update_execution(&self, ex_id: &ExId, patch: ExecutionPatch) -> Result<()> {
        let partial = stamped_partial(&patch)?;
        match self
            .backend
            .update(&self.index, &ex_id.to_string(), partial)
            .await
        {
            Ok(()) => Ok(()),
            Err(StoreError::NotFound(_)) => {
                Err(CoreError::NotFound(format!("execution {ex_id}")))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn search_executions(
        &self,
        query: QueryExpr,
        from: usize,
        size: usize,
        sort: Option<&SortSpec>,
    ) -> Result<Vec<ExecutionRecord>> {
        let size = size.min(MAX_SEARCH_SIZE);
        let docs = self
            .backend
            .search(&self.index, &query, from, size, sort)
            .await?;
        docs.into_iter().map(from_doc).collect()
    }

    /// Executions currently in any of the given statuses.
    pub async fn executions_with_status(
        &self,
        statuses: &[ExecutionStatus],
    ) -> Result<Vec<ExecutionRecord>> {
        let query = QueryExpr::and(vec![
            QueryExpr::context(RecordContext::Ex),
            QueryExpr::any_status(statuses),
        ]);
        self.search_executions(query, 0, MAX_SEARCH_SIZE, None).await
    }

    /// Every execution of a job, oldest first.
    pub async fn executions_for_job(&self, job_id: &JobId) -> Result<Vec<ExecutionRecord>> {
        let query = QueryExpr::and(vec![
            QueryExpr::context(RecordContext::Ex),
            QueryExpr::job(job_id),
        ]);
        self.search_executions(query, 0, MAX_SEARCH_SIZE, Some(&SortSpec::asc("_created")))
            .await
    }

    /// Most recently created execution of a job, optionally restricted to
    /// the active statuses.
    pub async fn latest_execution(
        &self,
        job_id: &JobId,
        only_if_active: bool,
    ) -> Result<Option<ExecutionRecord>> {
        let mut clauses = vec![
            QueryExpr::context(RecordContext::Ex),
            QueryExpr::job(job_id),
        ];
        if only_if_active {
            clauses.push(QueryExpr::any_status(crate::status::ACTIVE_STATUSES));
        }
        let hits = self
            .search_executions(
                QueryExpr::and(clauses),
                0,
                1,
                Some(&SortSpec::desc("_created")),
            )
            .await?;
        Ok(hits.into_iter().next())
    }

    pub async fn get_jobs(&self, from: usize, size: usize) -> Result<Vec<JobRecord>> {
        let size = size.min(MAX_SEARCH_SIZE);
        let docs = self
            .backend
            .search(
                &self.index,
                &QueryExpr::context(RecordContext::Job),
                from,
                size,
                Some(&SortSpec::asc("_created")),
            )
            .await?;
        docs.into_iter().map(from_doc).collect()
    }

    pub async fn close(&self) -> Result<()> {
        self.backend.close().await?;
        Ok(())
    }
}

fn to_doc<T: Serialize>(record: &T) -> Result<Value> {
    serde_json::to_value(record)
        .map_err(|e| StoreError::Corrupt(e.to_string()).into())
}

fn from_doc<T: DeserializeOwned>(doc: Value) -> Result<T> {
    serde_json::from_value(doc).map_err(|e| StoreError::Corrupt(e.to_string()).into())
}

/// Serialize a partial update and stamp `_updated` on it.
fn stamped_partial<T: Serialize>(update: &T) -> Result<Value> {
    let mut partial = to_doc(update)?;
    let now = Value::from(Utc::now().timestamp_nanos_opt().unwrap_or_default());
    match &mut partial {
        Value::Object(fields) => {
            fields.insert("_updated".to_string(), now);
            Ok(partial)
        }
        _ => Err(StoreError::Corrupt("partial update must be an object".to_string()).into()),
    }
}

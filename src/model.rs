use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use uuid::Uuid;

use crate::status::ExecutionStatus;

/// Type-safe job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for JobId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Type-safe execution identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExId(Uuid);

impl ExId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl std::fmt::Display for ExId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for ExId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

/// Discriminates the two record kinds sharing the state index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordContext {
    Job,
    Ex,
}

impl std::fmt::Display for RecordContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordContext::Job => f.write_str("job"),
            RecordContext::Ex => f.write_str("ex"),
        }
    }
}

/// How many runs a job template is good for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobLifecycle {
    #[default]
    Once,
    Persistent,
}

/// Declared external data-source connections, keyed by connection type.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionMap(HashMap<String, Vec<String>>);

impl ConnectionMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Add a named connection under `conn_type`, skipping duplicates.
    pub fn insert_connection(&mut self, conn_type: &str, name: &str) {
        let entry = self.0.entry(conn_type.to_string()).or_default();
        if !entry.iter().any(|existing| existing == name) {
            entry.push(name.to_string());
        }
    }

    pub fn with_connection(mut self, conn_type: &str, name: &str) -> Self {
        self.insert_connection(conn_type, name);
        self
    }

    /// Whether the map names the referenced connection.
    pub fn touches(&self, reference: &ConnectionRef) -> bool {
        self.0
            .get(&reference.conn_type)
            .is_some_and(|names| names.iter().any(|name| name == &reference.connection))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<String>)> {
        self.0.iter()
    }
}

/// A single `{type, connection}` pair as carried by moderation events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionRef {
    #[serde(rename = "type")]
    pub conn_type: String,
    pub connection: String,
}

impl ConnectionRef {
    pub fn new(conn_type: impl Into<String>, connection: impl Into<String>) -> Self {
        Self {
            conn_type: conn_type.into(),
            connection: connection.into(),
        }
    }
}

/// User-supplied job template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub name: String,
    #[serde(default)]
    pub lifecycle: JobLifecycle,
    pub workers: u32,
    /// Operator pipeline; opaque to the core.
    pub operations: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator: Option<ConnectionMap>,
}

/// Persisted job template. Immutable to the core except via explicit update.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,
    #[serde(flatten)]
    pub spec: JobSpec,
    #[serde(rename = "_context")]
    pub context: RecordContext,
    // Epoch nanoseconds: fixed-width in documents, so a lexicographic sort
    // on the stored field is chronological.
    #[serde(rename = "_created", with = "chrono::serde::ts_nanoseconds")]
    pub created: DateTime<Utc>,
    #[serde(rename = "_updated", with = "chrono::serde::ts_nanoseconds")]
    pub updated: DateTime<Utc>,
}

impl JobRecord {
    pub(crate) fn new(spec: JobSpec) -> Self {
        let now = Utc::now();
        Self {
            job_id: JobId::generate(),
            spec,
            context: RecordContext::Job,
            created: now,
            updated: now,
        }
    }
}

/// One run of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub ex_id: ExId,
    pub job_id: JobId,
    pub name: String,
    pub workers: u32,
    /// Pipeline snapshot taken at submission time.
    pub operations: Vec<Value>,
    /// Resolved asset content ids; the job keeps the human-readable names.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub moderator: Option<ConnectionMap>,
    #[serde(rename = "_status")]
    pub status: ExecutionStatus,
    #[serde(rename = "_context")]
    pub context: RecordContext,
    #[serde(rename = "_created", with = "chrono::serde::ts_nanoseconds")]
    pub created: DateTime<Utc>,
    #[serde(rename = "_updated", with = "chrono::serde::ts_nanoseconds")]
    pub updated: DateTime<Utc>,
    #[serde(rename = "_failureReason", default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(rename = "_slicer_stats", default, skip_serializing_if = "Option::is_none")]
    pub slicer_stats: Option<Value>,
    #[serde(rename = "_has_errors", default, skip_serializing_if = "Option::is_none")]
    pub has_errors: Option<ErrorsFlag>,
    #[serde(rename = "_recover_execution", default, skip_serializing_if = "is_false")]
    pub recover_execution: bool,
}

fn is_false(flag: &bool) -> bool {
    !*flag
}

impl ExecutionRecord {
    /// Snapshot a job into a fresh execution.
    pub(crate) fn from_job(job: &JobRecord, assets: Option<Vec<String>>) -> Self {
        let now = Utc::now();
        Self {
            ex_id: ExId::generate(),
            job_id: job.job_id.clone(),
            name: job.spec.name.clone(),
            workers: job.spec.workers,
            operations: job.spec.operations.clone(),
            assets,
            moderator: job.spec.moderator.clone(),
            status: ExecutionStatus::Pending,
            context: RecordContext::Ex,
            created: now,
            updated: now,
            failure_reason: None,
            slicer_stats: None,
            has_errors: None,
            recover_execution: false,
        }
    }
}

/// `_has_errors` is either the boolean `true` or the string `"recovered"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorsFlag {
    Errored,
    Recovered,
}

impl Serialize for ErrorsFlag {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ErrorsFlag::Errored => serializer.serialize_bool(true),
            ErrorsFlag::Recovered => serializer.serialize_str("recovered"),
        }
    }
}

impl<'de> Deserialize<'de> for ErrorsFlag {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match Value::deserialize(deserializer)? {
            Value::Bool(true) => Ok(ErrorsFlag::Errored),
            Value::String(s) if s == "recovered" => Ok(ErrorsFlag::Recovered),
            other => Err(D::Error::custom(format!(
                "invalid _has_errors value: {other}"
            ))),
        }
    }
}

/// Partial update merged into an execution record.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ExecutionPatch {
    #[serde(rename = "_status", skip_serializing_if = "Option::is_none")]
    pub status: Option<ExecutionStatus>,
    #[serde(rename = "_failureReason", skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(rename = "_slicer_stats", skip_serializing_if = "Option::is_none")]
    pub slicer_stats: Option<Value>,
    #[serde(rename = "_has_errors", skip_serializing_if = "Option::is_none")]
    pub has_errors: Option<ErrorsFlag>,
    #[serde(rename = "_recover_execution", skip_serializing_if = "Option::is_none")]
    pub recover_execution: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Value>>,
}

/// Partial update merged into a job template.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JobUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lifecycle: Option<JobLifecycle>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assets: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moderator: Option<ConnectionMap>,
}

use serde_json::Value;

use crate::model::{JobId, RecordContext};
use crate::status::ExecutionStatus;

/// Typed query over persisted records.
///
/// The core never concatenates query strings; expressions render to the
/// store's query language at the backend boundary, and evaluate directly
/// against documents for backends that hold them in memory.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryExpr {
    Term { field: String, value: String },
    And(Vec<QueryExpr>),
    Or(Vec<QueryExpr>),
}

impl QueryExpr {
    pub fn term(field: impl Into<String>, value: impl std::fmt::Display) -> Self {
        QueryExpr::Term {
            field: field.into(),
            value: value.to_string(),
        }
    }

    /// Conjunction. A single clause collapses to itself.
    pub fn and(mut exprs: Vec<QueryExpr>) -> Self {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            QueryExpr::And(exprs)
        }
    }

    /// Disjunction. A single clause collapses to itself.
    pub fn or(mut exprs: Vec<QueryExpr>) -> Self {
        if exprs.len() == 1 {
            exprs.remove(0)
        } else {
            QueryExpr::Or(exprs)
        }
    }

    pub fn context(context: RecordContext) -> Self {
        Self::term("_context", context)
    }

    pub fn status(status: ExecutionStatus) -> Self {
        Self::term("_status", status)
    }

    pub fn any_status(statuses: &[ExecutionStatus]) -> Self {
        Self::or(statuses.iter().copied().map(Self::status).collect())
    }

    pub fn job(job_id: &JobId) -> Self {
        Self::term("job_id", job_id)
    }

    /// Render to the document store's query language.
    pub fn to_query_string(&self) -> String {
        fn render_child(child: &QueryExpr) -> String {
            match child {
                QueryExpr::Term { .. } => child.to_query_string(),
                _ => format!("({})", child.to_query_string()),
            }
        }

        match self {
            QueryExpr::Term { field, value } => format!("{field}:{value}"),
            QueryExpr::And(children) => children
                .iter()
                .map(render_child)
                .collect::<Vec<_>>()
                .join(" AND "),
            QueryExpr::Or(children) => children
                .iter()
                .map(render_child)
                .collect::<Vec<_>>()
                .join(" OR "),
        }
    }

    /// Evaluate against a document.
    pub fn matches(&self, doc: &Value) -> bool {
        match self {
            QueryExpr::Term { field, value } => {
                field_as_string(doc, field).is_some_and(|actual| actual == *value)
            }
            QueryExpr::And(children) => children.iter().all(|child| child.matches(doc)),
            QueryExpr::Or(children) => children.iter().any(|child| child.matches(doc)),
        }
    }
}

/// Scalar document field rendered as a string, for term comparison and
/// sorting.
pub(crate) fn field_as_string(doc: &Value, field: &str) -> Option<String> {
    match doc.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

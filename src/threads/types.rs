//! Core records: nodes (observations), threads, batches, and the context
//! fields parsed out of stored JSON.
//!
//! Context columns are written by the capture side and can hold anything.
//! Reads never fail on them: malformed or missing values become the empty
//! default (see [`parse_json_or_default`]).

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

/// Lifecycle state of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadStatus {
    Active,
    Inactive,
    Closed,
}

impl ThreadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ThreadStatus::Active => "active",
            ThreadStatus::Inactive => "inactive",
            ThreadStatus::Closed => "closed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "active" => Some(ThreadStatus::Active),
            "inactive" => Some(ThreadStatus::Inactive),
            "closed" => Some(ThreadStatus::Closed),
            _ => None,
        }
    }
}

impl ToSql for ThreadStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for ThreadStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        ThreadStatus::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown thread status: {}", text).into()))
    }
}

/// Status of one reconciliation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Pending,
    Succeeded,
    Failed,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Succeeded => "succeeded",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pending" => Some(BatchStatus::Pending),
            "succeeded" => Some(BatchStatus::Succeeded),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

impl ToSql for BatchStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for BatchStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let text = value.as_str()?;
        BatchStatus::parse(text)
            .ok_or_else(|| FromSqlError::Other(format!("unknown batch status: {}", text).into()))
    }
}

/// One entry of a thread's append-only milestone log
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Milestone {
    pub timestamp: i64,
    pub description: String,
}

/// Thread aggregate as stored in `threads`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    pub origin_key: String,
    pub title: String,
    pub summary: String,
    pub current_phase: Option<String>,
    pub current_focus: Option<String>,
    pub status: ThreadStatus,
    pub start_time: i64,
    pub last_active_at: i64,
    pub duration_ms: i64,
    pub node_count: i64,
    pub apps: Vec<String>,
    pub key_entities: Vec<String>,
    pub milestones: Vec<Milestone>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Thread {
    pub fn snapshot(&self) -> ThreadSnapshot {
        ThreadSnapshot {
            thread_id: self.id.clone(),
            title: self.title.clone(),
            summary: self.summary.clone(),
            duration_ms: self.duration_ms,
            current_phase: self.current_phase.clone(),
            current_focus: self.current_focus.clone(),
        }
    }
}

/// Denormalized thread state embedded on a node (write-once)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSnapshot {
    pub thread_id: String,
    pub title: String,
    pub summary: String,
    pub duration_ms: i64,
    pub current_phase: Option<String>,
    pub current_focus: Option<String>,
}

/// Application the user was in when a node was captured
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppContext {
    pub app_name: String,
    pub window_title: Option<String>,
    pub url: Option<String>,
}

/// Entities arrive either as bare strings or as `{"name": ...}` objects
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityRef {
    Name(String),
    Named { name: String },
}

impl EntityRef {
    pub fn name(&self) -> &str {
        match self {
            EntityRef::Name(name) => name,
            EntityRef::Named { name } => name,
        }
    }
}

/// Knowledge extracted from a node by the capture pipeline
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Knowledge {
    pub summary: Option<String>,
    pub entities: Vec<EntityRef>,
}

/// The parsed context of one node, as used by aggregation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeContext {
    pub app: AppContext,
    pub knowledge: Knowledge,
    pub keywords: Vec<String>,
}

impl NodeContext {
    pub fn from_columns(
        app_context: Option<&str>,
        knowledge: Option<&str>,
        keywords: Option<&str>,
    ) -> Self {
        Self {
            app: parse_json_or_default(app_context, "app_context"),
            knowledge: parse_json_or_default(knowledge, "knowledge"),
            keywords: parse_json_or_default(keywords, "keywords"),
        }
    }
}

/// Parse a stored JSON column, falling back to `T::default()`.
pub fn parse_json_or_default<T>(raw: Option<&str>, field: &str) -> T
where
    T: DeserializeOwned + Default,
{
    match raw.map(str::trim) {
        None | Some("") | Some("null") => T::default(),
        Some(text) => serde_json::from_str(text).unwrap_or_else(|e| {
            log::debug!("⚠️  Malformed {} JSON, using empty value: {}", field, e);
            T::default()
        }),
    }
}

/// A node as stored in `nodes`
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub id: String,
    pub timestamp: i64,
    pub title: String,
    pub summary: String,
    pub app_context: Option<String>,
    pub knowledge: Option<String>,
    pub state_snapshot: Option<String>,
    pub keywords: Option<String>,
    pub thread_id: Option<String>,
    pub thread_snapshot: Option<String>,
}

impl NodeRecord {
    pub fn context(&self) -> NodeContext {
        NodeContext::from_columns(
            self.app_context.as_deref(),
            self.knowledge.as_deref(),
            self.keywords.as_deref(),
        )
    }

    pub fn snapshot(&self) -> Option<ThreadSnapshot> {
        let raw = self.thread_snapshot.as_deref()?;
        serde_json::from_str(raw).ok()
    }
}

/// Node as handed over by the capture pipeline (thread fields start null)
#[derive(Debug, Clone, Default)]
pub struct NewNode {
    pub id: String,
    pub timestamp: i64,
    pub title: String,
    pub summary: String,
    pub app_context: Option<AppContext>,
    pub knowledge: Option<Knowledge>,
    pub state_snapshot: Option<serde_json::Value>,
    pub keywords: Vec<String>,
}

/// A node in the context of one batch: `position` is its proposal index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchNode {
    pub position: usize,
    pub id: String,
    pub timestamp: i64,
    pub thread_id: Option<String>,
}

/// Batch row as stored in `batches`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub id: String,
    pub status: BatchStatus,
    pub error_message: Option<String>,
    pub next_retry_at: Option<i64>,
    pub attempts: i64,
    pub created_at: i64,
    pub updated_at: i64,
}

/// How many of a batch's nodes already carry a thread identity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchProgress {
    pub total: usize,
    pub assigned: usize,
}

impl BatchProgress {
    /// Every node assigned: a previous attempt committed assignments.
    pub fn is_fully_assigned(&self) -> bool {
        self.total > 0 && self.assigned == self.total
    }

    pub fn is_partially_assigned(&self) -> bool {
        self.assigned > 0 && self.assigned < self.total
    }
}

//! Where clustering proposals come from.
//!
//! The real source is an external inference call; the runtime only needs
//! "given this batch, give me raw proposal JSON". `FileProposalSource` reads
//! pre-computed proposals from disk.

use crate::threads::{ReconcileError, ThreadStatus, ThreadStore};
use async_trait::async_trait;
use serde::Serialize;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;

/// One node as shown to the proposal source
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalNode {
    pub node_index: usize,
    pub id: String,
    pub timestamp: i64,
    pub title: String,
    pub summary: String,
    pub app_name: String,
    pub keywords: Vec<String>,
}

/// A thread the proposal may assign nodes to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadSummary {
    pub thread_id: String,
    pub title: String,
    pub summary: String,
    pub current_phase: Option<String>,
    pub last_active_at: i64,
}

/// Input for one proposal: the batch's nodes in index order plus the
/// currently active threads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposalRequest {
    pub batch_id: String,
    pub nodes: Vec<ProposalNode>,
    pub active_threads: Vec<ThreadSummary>,
}

impl ProposalRequest {
    pub fn load(store: &ThreadStore, batch_id: &str) -> Result<Self, ReconcileError> {
        let nodes = store
            .batch_node_records(batch_id)?
            .into_iter()
            .enumerate()
            .map(|(node_index, record)| {
                let context = record.context();
                ProposalNode {
                    node_index,
                    id: record.id,
                    timestamp: record.timestamp,
                    title: record.title,
                    summary: record.summary,
                    app_name: context.app.app_name,
                    keywords: context.keywords,
                }
            })
            .collect();

        let active_threads = store
            .threads_with_status(ThreadStatus::Active)?
            .into_iter()
            .map(|thread| ThreadSummary {
                thread_id: thread.id,
                title: thread.title,
                summary: thread.summary,
                current_phase: thread.current_phase,
                last_active_at: thread.last_active_at,
            })
            .collect();

        Ok(Self {
            batch_id: batch_id.to_string(),
            nodes,
            active_threads,
        })
    }
}

#[derive(Debug, Error)]
pub enum ProposalSourceError {
    /// No proposal available yet; try again on a later pass
    #[error("no proposal available for batch {0}")]
    NotReady(String),

    #[error("proposal source failed: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait]
pub trait ProposalSource: Send + Sync {
    /// Raw proposal JSON for the request's batch
    async fn fetch_proposal(&self, request: &ProposalRequest) -> Result<String, ProposalSourceError>;
}

/// Reads `<dir>/<batch_id>.json`
pub struct FileProposalSource {
    dir: PathBuf,
}

impl FileProposalSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, batch_id: &str) -> PathBuf {
        self.dir.join(format!("{}.json", batch_id))
    }
}

#[async_trait]
impl ProposalSource for FileProposalSource {
    async fn fetch_proposal(&self, request: &ProposalRequest) -> Result<String, ProposalSourceError> {
        let path = self.path_for(&request.batch_id);
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(raw),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(ProposalSourceError::NotReady(request.batch_id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }
}

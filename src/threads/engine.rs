//! Reconciliation engine: applies one clustering proposal to storage.
//!
//! Control flow for one batch, all inside a single IMMEDIATE transaction:
//!
//! ```text
//! load batch ─┬─ every node assigned ──► finalize (recompute + snapshots + mark)
//!             ├─ some nodes assigned ──► ConsistencyError
//!             └─ none assigned ──► validate ─► verify refs ─► materialize
//!                                  ─► resolve ─► assign ─► patch
//!                                  ─► recompute + snapshots ─► mark succeeded
//! ```
//!
//! Any error drops the transaction; the batch row keeps its previous status
//! and retry fields so the scheduler can decide what to do next.

use super::aggregator::recompute_thread;
use super::config::ReconcileConfig;
use super::db::{load_batch, load_batch_nodes, load_thread, mark_batch_succeeded, ThreadStore};
use super::error::{ConsistencyError, ReconcileError, ReferentialError, ValidationError};
use super::lifecycle::{reactivate_threads, sweep_inactive_threads};
use super::materializer::materialize_new_threads;
use super::proposal::{ClusteringProposal, ThreadPatch};
use super::resolver::{resolve_assignments, verify_thread_references};
use super::snapshot::fill_snapshots;
use super::types::{BatchNode, BatchProgress, Milestone};
use super::validator::validate_proposal;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use std::collections::BTreeSet;

/// Which path a reconciliation took
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileOutcome {
    /// Proposal validated and applied
    Applied,
    /// Nodes were already assigned; only derived state was completed
    Finalized,
}

/// Summary handed back for cache invalidation / UI refresh
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResult {
    pub batch_id: String,
    pub outcome: ReconcileOutcome,
    /// Sorted, distinct
    pub affected_thread_ids: Vec<String>,
    /// Nodes assigned by this call, in batch order
    pub assigned_node_ids: Vec<String>,
    /// Threads inserted by this call (adopted ones excluded)
    pub created_thread_ids: Vec<String>,
}

pub struct ThreadReconciler {
    store: ThreadStore,
    config: ReconcileConfig,
    now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
}

impl ThreadReconciler {
    /// Reconciler using wall-clock milliseconds
    pub fn new(store: ThreadStore, config: ReconcileConfig) -> Self {
        Self::new_with_timestamp_fn(
            store,
            config,
            Box::new(|| chrono::Utc::now().timestamp_millis()),
        )
    }

    /// Reconciler with a custom clock (Unix milliseconds), for deterministic tests
    pub fn new_with_timestamp_fn(
        store: ThreadStore,
        config: ReconcileConfig,
        now_fn: Box<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        Self {
            store,
            config,
            now_fn,
        }
    }

    pub fn store(&self) -> &ThreadStore {
        &self.store
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Current time from the reconciler's clock (Unix milliseconds)
    pub fn now(&self) -> i64 {
        (self.now_fn)()
    }

    /// Apply a proposal to a batch.
    ///
    /// If every node of the batch is already assigned, the proposal is
    /// ignored and the batch is finalized instead.
    pub fn reconcile_batch(
        &self,
        batch_id: &str,
        proposal: &ClusteringProposal,
    ) -> Result<ReconcileResult, ReconcileError> {
        let now = (self.now_fn)();
        let result = self.store.write_transaction(|tx| {
            let nodes = load_nodes_checked(tx, batch_id)?;
            let progress = progress_of(&nodes);

            if progress.is_fully_assigned() {
                log::info!(
                    "🔁 Batch {} already assigned ({} nodes), finalizing",
                    batch_id,
                    progress.total
                );
                return self.finalize_in(tx, batch_id, &nodes, now);
            }
            if progress.is_partially_assigned() {
                return Err(partially_assigned(batch_id, progress));
            }

            self.apply_in(tx, batch_id, proposal, &nodes, now)
        });

        log_outcome(batch_id, &result);
        result
    }

    /// Parse raw model output and apply it.
    pub fn reconcile_batch_json(
        &self,
        batch_id: &str,
        raw: &str,
    ) -> Result<ReconcileResult, ReconcileError> {
        let proposal = ClusteringProposal::from_json(raw).map_err(|e| {
            log::warn!("⚠️  Batch {} rejected (validation): {}", batch_id, e);
            ValidationError::MalformedProposal(e.to_string())
        })?;
        self.reconcile_batch(batch_id, &proposal)
    }

    /// Recovery path: recompute, fill snapshots and mark a fully assigned batch.
    ///
    /// Safe to call repeatedly; after the first success it writes nothing.
    pub fn finalize_batch(&self, batch_id: &str) -> Result<ReconcileResult, ReconcileError> {
        let now = (self.now_fn)();
        let result = self.store.write_transaction(|tx| {
            let nodes = load_nodes_checked(tx, batch_id)?;
            let progress = progress_of(&nodes);
            if progress.total > 0 && !progress.is_fully_assigned() {
                return Err(partially_assigned(batch_id, progress));
            }
            self.finalize_in(tx, batch_id, &nodes, now)
        });

        log_outcome(batch_id, &result);
        result
    }

    /// Move idle active threads to inactive. Returns how many changed.
    pub fn sweep_inactive(&self) -> Result<usize, ReconcileError> {
        let now = (self.now_fn)();
        let threshold = self.config.inactivity_threshold_ms;
        let changed = self
            .store
            .write_transaction(|tx| Ok(sweep_inactive_threads(tx, now, threshold)?))?;

        if changed > 0 {
            log::info!("💤 Marked {} threads inactive", changed);
        } else {
            log::debug!("💤 No threads past the inactivity threshold");
        }
        Ok(changed)
    }

    fn apply_in(
        &self,
        conn: &Connection,
        batch_id: &str,
        proposal: &ClusteringProposal,
        nodes: &[BatchNode],
        now: i64,
    ) -> Result<ReconcileResult, ReconcileError> {
        validate_proposal(proposal, nodes.len())?;
        verify_thread_references(conn, proposal)?;

        let materialized =
            materialize_new_threads(conn, batch_id, &proposal.new_threads, nodes, now)?;
        let resolved = resolve_assignments(proposal, nodes, &materialized)?;

        let assigned_node_ids = assign_nodes(conn, nodes, &resolved)?;

        let targets: BTreeSet<&str> = resolved.iter().map(String::as_str).collect();
        let targets: Vec<&str> = targets.into_iter().collect();
        let reactivated = reactivate_threads(conn, &targets, now)?;
        if reactivated > 0 {
            log::debug!("⏰ Reactivated {} threads", reactivated);
        }

        let milestone_time = nodes.iter().map(|n| n.timestamp).max().unwrap_or(now);
        for patch in &proposal.thread_updates {
            apply_patch(conn, patch, milestone_time, now)?;
        }

        let mut affected: BTreeSet<String> = resolved.iter().cloned().collect();
        affected.extend(proposal.thread_updates.iter().map(|p| p.thread_id.clone()));
        for thread_id in &affected {
            recompute_thread(conn, thread_id, &self.config, now)?;
        }

        let assigned_nodes: Vec<BatchNode> = nodes
            .iter()
            .zip(&resolved)
            .map(|(node, thread_id)| BatchNode {
                thread_id: Some(thread_id.clone()),
                ..node.clone()
            })
            .collect();
        fill_snapshots(conn, &assigned_nodes)?;

        mark_batch_succeeded(conn, batch_id, now)?;

        Ok(ReconcileResult {
            batch_id: batch_id.to_string(),
            outcome: ReconcileOutcome::Applied,
            affected_thread_ids: affected.into_iter().collect(),
            assigned_node_ids,
            created_thread_ids: materialized
                .into_iter()
                .filter(|m| m.created)
                .map(|m| m.thread_id)
                .collect(),
        })
    }

    fn finalize_in(
        &self,
        conn: &Connection,
        batch_id: &str,
        nodes: &[BatchNode],
        now: i64,
    ) -> Result<ReconcileResult, ReconcileError> {
        let affected: BTreeSet<String> = nodes.iter().filter_map(|n| n.thread_id.clone()).collect();
        for thread_id in &affected {
            recompute_thread(conn, thread_id, &self.config, now)?;
        }
        fill_snapshots(conn, nodes)?;
        mark_batch_succeeded(conn, batch_id, now)?;

        Ok(ReconcileResult {
            batch_id: batch_id.to_string(),
            outcome: ReconcileOutcome::Finalized,
            affected_thread_ids: affected.into_iter().collect(),
            assigned_node_ids: Vec::new(),
            created_thread_ids: Vec::new(),
        })
    }
}

fn load_nodes_checked(conn: &Connection, batch_id: &str) -> Result<Vec<BatchNode>, ReconcileError> {
    if load_batch(conn, batch_id)?.is_none() {
        return Err(ReferentialError::UnknownBatch(batch_id.to_string()).into());
    }
    Ok(load_batch_nodes(conn, batch_id)?)
}

fn progress_of(nodes: &[BatchNode]) -> BatchProgress {
    BatchProgress {
        total: nodes.len(),
        assigned: nodes.iter().filter(|n| n.thread_id.is_some()).count(),
    }
}

fn partially_assigned(batch_id: &str, progress: BatchProgress) -> ReconcileError {
    ConsistencyError::PartiallyAssigned {
        batch_id: batch_id.to_string(),
        assigned: progress.assigned,
        total: progress.total,
    }
    .into()
}

/// Write-once assignment. A node that was assigned concurrently must
/// already hold the resolved thread.
fn assign_nodes(
    conn: &Connection,
    nodes: &[BatchNode],
    resolved: &[String],
) -> Result<Vec<String>, ReconcileError> {
    let mut stmt =
        conn.prepare_cached("UPDATE nodes SET thread_id = ?1 WHERE id = ?2 AND thread_id IS NULL")?;

    let mut assigned = Vec::with_capacity(nodes.len());
    for (node, thread_id) in nodes.iter().zip(resolved) {
        if stmt.execute(params![thread_id, node.id])? == 1 {
            assigned.push(node.id.clone());
            continue;
        }

        let persisted: Option<String> = conn
            .query_row("SELECT thread_id FROM nodes WHERE id = ?1", [&node.id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
        if persisted.as_deref() != Some(thread_id.as_str()) {
            log::error!(
                "❌ Node {} could not be assigned to {} (holds {:?})",
                node.id,
                thread_id,
                persisted
            );
            return Err(ConsistencyError::AssignmentConflict {
                node_id: node.id.clone(),
                persisted: persisted.unwrap_or_default(),
                resolved: thread_id.clone(),
            }
            .into());
        }
    }

    Ok(assigned)
}

/// Append non-blank milestone descriptions; returns how many were added.
fn append_milestones(
    milestones: &mut Vec<Milestone>,
    descriptions: &[String],
    timestamp: i64,
) -> usize {
    let before = milestones.len();
    milestones.extend(
        descriptions
            .iter()
            .map(|m| m.trim())
            .filter(|m| !m.is_empty())
            .map(|description| Milestone {
                timestamp,
                description: description.to_string(),
            }),
    );
    milestones.len() - before
}

/// Overwrite present metadata fields and append milestones.
fn apply_patch(
    conn: &Connection,
    patch: &ThreadPatch,
    milestone_time: i64,
    now: i64,
) -> Result<(), ReconcileError> {
    let thread = load_thread(conn, &patch.thread_id)?
        .ok_or_else(|| ReferentialError::UnknownThread(patch.thread_id.clone()))?;

    let mut milestones = thread.milestones;
    let appended = append_milestones(&mut milestones, &patch.milestones, milestone_time);

    conn.execute(
        "UPDATE threads
         SET title = COALESCE(?1, title),
             summary = COALESCE(?2, summary),
             current_phase = COALESCE(?3, current_phase),
             current_focus = COALESCE(?4, current_focus),
             milestones = ?5,
             updated_at = ?6
         WHERE id = ?7",
        params![
            patch.title,
            patch.summary,
            patch.current_phase,
            patch.current_focus,
            serde_json::to_string(&milestones)?,
            now,
            patch.thread_id,
        ],
    )?;

    log::debug!(
        "✏️  Patched thread {} (+{} milestones)",
        patch.thread_id,
        appended
    );
    Ok(())
}

fn log_outcome(batch_id: &str, result: &Result<ReconcileResult, ReconcileError>) {
    match result {
        Ok(r) => {
            log::info!(
                "✅ Batch {} {}: {} nodes assigned, {} threads affected, {} created",
                batch_id,
                match r.outcome {
                    ReconcileOutcome::Applied => "applied",
                    ReconcileOutcome::Finalized => "finalized",
                },
                r.assigned_node_ids.len(),
                r.affected_thread_ids.len(),
                r.created_thread_ids.len()
            );
        }
        Err(e @ ReconcileError::Consistency(_)) => {
            log::error!("❌ Batch {} rejected ({}): {}", batch_id, e.kind().as_str(), e);
        }
        Err(e) => {
            log::warn!("⚠️  Batch {} rejected ({}): {}", batch_id, e.kind().as_str(), e);
        }
    }
}

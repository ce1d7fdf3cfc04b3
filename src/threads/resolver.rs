//! Maps every node of a batch to its final thread identity.

use super::db::thread_exists;
use super::error::{ConsistencyError, ReconcileError, ReferentialError, ValidationError};
use super::materializer::MaterializedThread;
use super::proposal::{ClusteringProposal, ThreadTarget};
use super::types::BatchNode;
use rusqlite::Connection;
use std::collections::HashMap;

/// Fail on the first referenced thread id that is not in storage.
pub fn verify_thread_references(
    conn: &Connection,
    proposal: &ClusteringProposal,
) -> Result<(), ReconcileError> {
    for thread_id in proposal.referenced_thread_ids() {
        if !thread_exists(conn, thread_id)? {
            return Err(ReferentialError::UnknownThread(thread_id.to_string()).into());
        }
    }
    Ok(())
}

/// Resolve node index → thread id.
///
/// Existing targets pass through; NEW targets go through the thread
/// materialized for the definition that lists the node. A node that already
/// carries a thread id must resolve to exactly that id.
///
/// Assumes a validated proposal and `materialized[i]` belonging to
/// `proposal.new_threads[i]`.
pub fn resolve_assignments(
    proposal: &ClusteringProposal,
    nodes: &[BatchNode],
    materialized: &[MaterializedThread],
) -> Result<Vec<String>, ReconcileError> {
    let mut new_thread_of: HashMap<usize, &str> = HashMap::new();
    for (def, thread) in proposal.new_threads.iter().zip(materialized) {
        for &index in &def.node_indices {
            new_thread_of.insert(index, thread.thread_id.as_str());
        }
    }

    let mut resolved = vec![String::new(); nodes.len()];
    for assignment in &proposal.assignments {
        let index = assignment.node_index;
        let thread_id = match &assignment.thread_id {
            ThreadTarget::Existing(id) => id.as_str(),
            ThreadTarget::New => new_thread_of
                .get(&index)
                .copied()
                .ok_or(ValidationError::NewAssignmentWithoutThread { index })?,
        };

        let node = &nodes[index];
        if let Some(persisted) = &node.thread_id {
            if persisted != thread_id {
                log::error!(
                    "❌ Node {} already belongs to {}, proposal resolves it to {}",
                    node.id,
                    persisted,
                    thread_id
                );
                return Err(ConsistencyError::AssignmentConflict {
                    node_id: node.id.clone(),
                    persisted: persisted.clone(),
                    resolved: thread_id.to_string(),
                }
                .into());
            }
        }

        resolved[index] = thread_id.to_string();
    }

    Ok(resolved)
}

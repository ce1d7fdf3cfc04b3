//! Idempotent creation of the threads a proposal defines.
//!
//! Two identities per thread:
//! - `id`: random and opaque, generated once and never recomputed
//! - `origin_key`: derived from (batch id, sorted member indices), used only
//!   to find a thread an earlier attempt already created for the same cluster
//!
//! A retried reconciliation with the same grouping therefore lands on the
//! same row instead of creating a duplicate.

use super::error::{ConsistencyError, ReconcileError};
use super::proposal::NewThreadDef;
use super::types::{BatchNode, ThreadStatus};
use rand::Rng;
use rusqlite::{params, Connection, OptionalExtension};

/// Outcome of materializing one proposed thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterializedThread {
    pub thread_id: String,
    pub origin_key: String,
    /// False when an existing row with the same origin key was adopted
    pub created: bool,
}

/// Canonical dedup key: `["<batch_id>",[sorted, unique indices]]`
pub fn origin_key(batch_id: &str, node_indices: &[usize]) -> String {
    let mut indices = node_indices.to_vec();
    indices.sort_unstable();
    indices.dedup();
    serde_json::json!([batch_id, indices]).to_string()
}

/// Fresh opaque thread identity: `thr_` + 32 hex chars
pub fn generate_thread_id() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    format!("thr_{}", hex::encode(bytes))
}

/// Insert or adopt one thread per definition, in definition order.
///
/// `nodes` must be the batch's nodes in proposal order; the definitions are
/// assumed validated (indices in range).
pub fn materialize_new_threads(
    conn: &Connection,
    batch_id: &str,
    defs: &[NewThreadDef],
    nodes: &[BatchNode],
    now: i64,
) -> Result<Vec<MaterializedThread>, ReconcileError> {
    let mut materialized = Vec::with_capacity(defs.len());

    for def in defs {
        let key = origin_key(batch_id, &def.node_indices);
        let timestamps = def.node_indices.iter().map(|&i| nodes[i].timestamp);
        let start_time = timestamps.clone().min().unwrap_or(now);
        let last_active_at = timestamps.max().unwrap_or(now);

        let candidate_id = generate_thread_id();
        let inserted = conn.execute(
            "INSERT INTO threads (id, origin_key, title, summary, current_phase, current_focus,
                                  status, start_time, last_active_at, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)
             ON CONFLICT(origin_key) DO NOTHING",
            params![
                candidate_id,
                key,
                def.title,
                def.summary,
                def.current_phase,
                def.current_focus,
                ThreadStatus::Active,
                start_time,
                last_active_at,
                now,
            ],
        )?;

        let thread_id: String = conn
            .query_row(
                "SELECT id FROM threads WHERE origin_key = ?1",
                [&key],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_else(|| ConsistencyError::OriginKeyVanished(key.clone()))?;

        if inserted > 0 {
            log::debug!("🧵 Created thread {} ({})", thread_id, def.title);
        } else {
            log::debug!("♻️  Adopted existing thread {} for origin key {}", thread_id, key);
        }

        materialized.push(MaterializedThread {
            thread_id,
            origin_key: key,
            created: inserted > 0,
        });
    }

    Ok(materialized)
}

//! Write-once thread snapshots on the current batch's nodes.

use super::db::load_thread;
use super::error::ReconcileError;
use super::types::BatchNode;
use rusqlite::{params, Connection};
use std::collections::HashMap;

/// Embed the current state of each node's thread on that node.
///
/// Only nodes of `nodes` are touched, and only those without a snapshot yet.
/// `nodes` must reflect committed thread ids (unassigned nodes are skipped).
/// Returns how many snapshots were written.
pub fn fill_snapshots(conn: &Connection, nodes: &[BatchNode]) -> Result<usize, ReconcileError> {
    let mut serialized: HashMap<&str, Option<String>> = HashMap::new();
    let mut stmt = conn.prepare_cached(
        "UPDATE nodes SET thread_snapshot = ?1 WHERE id = ?2 AND thread_snapshot IS NULL",
    )?;

    let mut written = 0;
    for node in nodes {
        let Some(thread_id) = node.thread_id.as_deref() else {
            continue;
        };

        if !serialized.contains_key(thread_id) {
            let snapshot = load_thread(conn, thread_id)?
                .map(|thread| serde_json::to_string(&thread.snapshot()))
                .transpose()?;
            serialized.insert(thread_id, snapshot);
        }

        if let Some(Some(snapshot)) = serialized.get(thread_id) {
            written += stmt.execute(params![snapshot, node.id])?;
        }
    }

    if written > 0 {
        log::debug!("📸 Wrote {} thread snapshots", written);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::db::ThreadStore;
    use crate::threads::types::NewNode;

    fn setup() -> ThreadStore {
        let store = ThreadStore::open_in_memory().unwrap();
        for (id, ts) in [("n1", 1_000), ("n2", 2_000)] {
            store
                .insert_node(&NewNode {
                    id: id.to_string(),
                    timestamp: ts,
                    title: id.to_string(),
                    ..Default::default()
                })
                .unwrap();
        }
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO threads (id, origin_key, title, summary, duration_ms,
                                          start_time, last_active_at, created_at, updated_at)
                     VALUES ('thr_a', 'k_a', 'Debugging', 'auth flow', 60000, 0, 0, 0, 0)",
                    [],
                )?;
                conn.execute("UPDATE nodes SET thread_id = 'thr_a'", [])
            })
            .unwrap();
        store
    }

    fn batch(thread: Option<&str>) -> Vec<BatchNode> {
        ["n1", "n2"]
            .iter()
            .enumerate()
            .map(|(position, id)| BatchNode {
                position,
                id: id.to_string(),
                timestamp: 1_000,
                thread_id: thread.map(str::to_string),
            })
            .collect()
    }

    #[test]
    fn test_snapshot_written_once() {
        let store = setup();

        let first = store
            .write_transaction(|tx| fill_snapshots(tx, &batch(Some("thr_a"))))
            .unwrap();
        assert_eq!(first, 2);

        let snapshot = store.get_node("n1").unwrap().unwrap().snapshot().unwrap();
        assert_eq!(snapshot.thread_id, "thr_a");
        assert_eq!(snapshot.title, "Debugging");
        assert_eq!(snapshot.duration_ms, 60_000);

        // Later thread changes do not rewrite history
        store
            .with_connection(|conn| {
                conn.execute("UPDATE threads SET title = 'Renamed' WHERE id = 'thr_a'", [])
            })
            .unwrap();
        let second = store
            .write_transaction(|tx| fill_snapshots(tx, &batch(Some("thr_a"))))
            .unwrap();
        assert_eq!(second, 0);

        let snapshot = store.get_node("n2").unwrap().unwrap().snapshot().unwrap();
        assert_eq!(snapshot.title, "Debugging");
    }

    #[test]
    fn test_unassigned_nodes_are_skipped() {
        let store = setup();
        let written = store.write_transaction(|tx| fill_snapshots(tx, &batch(None))).unwrap();
        assert_eq!(written, 0);
        assert!(store.get_node("n1").unwrap().unwrap().thread_snapshot.is_none());
    }
}

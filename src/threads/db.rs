//! SQLite-backed thread store.
//!
//! `ThreadStore` is an explicit repository object: it owns a shared
//! connection handle and is injected into the reconciler, so tests can hand
//! in a fresh temp-file or in-memory database. The `*_tx`-style helpers take
//! a plain `&Connection` and are called with a `Transaction` (which derefs to
//! one) from inside the reconciler's single write transaction.

use super::error::{ReconcileError, ReferentialError, StorageError};
use super::types::{
    Batch, BatchNode, BatchProgress, BatchStatus, Milestone, NewNode, NodeRecord, Thread,
    ThreadStatus,
};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Schema files, applied in order. All of them use `IF NOT EXISTS`.
const SCHEMA_FILES: &[(&str, &str)] = &[
    ("00_threads.sql", include_str!("../../sql/00_threads.sql")),
    ("01_nodes.sql", include_str!("../../sql/01_nodes.sql")),
    ("02_batches.sql", include_str!("../../sql/02_batches.sql")),
];

/// Run the embedded schema migrations (idempotent)
pub fn run_schema_migrations(conn: &Connection) -> rusqlite::Result<()> {
    log::debug!("🔧 Running schema migrations");

    for (name, sql) in SCHEMA_FILES {
        conn.execute_batch(sql)?;
        log::debug!("   ├─ ✅ {}", name);
    }

    Ok(())
}

const THREAD_COLUMNS: &str = "id, origin_key, title, summary, current_phase, current_focus, \
     status, start_time, last_active_at, duration_ms, node_count, apps, key_entities, \
     milestones, created_at, updated_at";

const NODE_COLUMNS: &str = "id, timestamp, title, summary, app_context, knowledge, \
     state_snapshot, keywords, thread_id, thread_snapshot";

const BATCH_COLUMNS: &str =
    "id, status, error_message, next_retry_at, attempts, created_at, updated_at";

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    let apps: Option<String> = row.get(11)?;
    let key_entities: Option<String> = row.get(12)?;
    let milestones: Option<String> = row.get(13)?;

    Ok(Thread {
        id: row.get(0)?,
        origin_key: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        current_phase: row.get(4)?,
        current_focus: row.get(5)?,
        status: row.get(6)?,
        start_time: row.get(7)?,
        last_active_at: row.get(8)?,
        duration_ms: row.get(9)?,
        node_count: row.get(10)?,
        apps: super::types::parse_json_or_default(apps.as_deref(), "apps"),
        key_entities: super::types::parse_json_or_default(key_entities.as_deref(), "key_entities"),
        milestones: super::types::parse_json_or_default::<Vec<Milestone>>(
            milestones.as_deref(),
            "milestones",
        ),
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn node_from_row(row: &Row<'_>) -> rusqlite::Result<NodeRecord> {
    Ok(NodeRecord {
        id: row.get(0)?,
        timestamp: row.get(1)?,
        title: row.get(2)?,
        summary: row.get(3)?,
        app_context: row.get(4)?,
        knowledge: row.get(5)?,
        state_snapshot: row.get(6)?,
        keywords: row.get(7)?,
        thread_id: row.get(8)?,
        thread_snapshot: row.get(9)?,
    })
}

fn batch_from_row(row: &Row<'_>) -> rusqlite::Result<Batch> {
    Ok(Batch {
        id: row.get(0)?,
        status: row.get(1)?,
        error_message: row.get(2)?,
        next_retry_at: row.get(3)?,
        attempts: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub(crate) fn load_thread(conn: &Connection, thread_id: &str) -> rusqlite::Result<Option<Thread>> {
    conn.query_row(
        &format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS),
        [thread_id],
        thread_from_row,
    )
    .optional()
}

pub(crate) fn thread_exists(conn: &Connection, thread_id: &str) -> rusqlite::Result<bool> {
    let mut stmt = conn.prepare_cached("SELECT 1 FROM threads WHERE id = ?1")?;
    stmt.exists([thread_id])
}

pub(crate) fn load_batch(conn: &Connection, batch_id: &str) -> rusqlite::Result<Option<Batch>> {
    conn.query_row(
        &format!("SELECT {} FROM batches WHERE id = ?1", BATCH_COLUMNS),
        [batch_id],
        batch_from_row,
    )
    .optional()
}

/// Nodes of a batch in proposal order; `position` is the proposal index.
pub(crate) fn load_batch_nodes(conn: &Connection, batch_id: &str) -> rusqlite::Result<Vec<BatchNode>> {
    let mut stmt = conn.prepare_cached(
        "SELECT n.id, n.timestamp, n.thread_id
         FROM batch_nodes bn
         JOIN nodes n ON n.id = bn.node_id
         WHERE bn.batch_id = ?1
         ORDER BY bn.position ASC",
    )?;

    let rows = stmt.query_map([batch_id], |row| {
        Ok((
            row.get::<_, String>(0)?,
            row.get::<_, i64>(1)?,
            row.get::<_, Option<String>>(2)?,
        ))
    })?;

    let mut nodes = Vec::new();
    for (position, row) in rows.enumerate() {
        let (id, timestamp, thread_id) = row?;
        nodes.push(BatchNode {
            position,
            id,
            timestamp,
            thread_id,
        });
    }

    Ok(nodes)
}

/// Mark a batch succeeded and clear stale retry fields.
///
/// No-op (returns false) when the batch is already clean and succeeded.
pub(crate) fn mark_batch_succeeded(
    conn: &Connection,
    batch_id: &str,
    now: i64,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "UPDATE batches
         SET status = ?1, error_message = NULL, next_retry_at = NULL, updated_at = ?2
         WHERE id = ?3
           AND (status <> ?1 OR error_message IS NOT NULL OR next_retry_at IS NOT NULL)",
        params![BatchStatus::Succeeded, now, batch_id],
    )?;
    Ok(changed > 0)
}

/// Shared handle to the reconciler's database
#[derive(Clone)]
pub struct ThreadStore {
    conn: Arc<Mutex<Connection>>,
}

impl ThreadStore {
    /// Open (or create) a database file, creating its parent directory.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, ReconcileError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
            }
        }

        let conn = Connection::open(db_path)?;
        log::info!("✅ Thread store opened at {}", db_path.display());
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, ReconcileError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection; applies pragmas and migrations.
    pub fn from_connection(conn: Connection) -> Result<Self, ReconcileError> {
        apply_optimized_pragmas(&conn)?;
        run_schema_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, ReconcileError> {
        self.conn
            .lock()
            .map_err(|_| ReconcileError::from(StorageError::LockPoisoned))
    }

    /// Run `f` inside one IMMEDIATE transaction.
    ///
    /// Commits only if `f` returns `Ok`; any error drops the transaction,
    /// which rolls back every write made through it.
    pub fn write_transaction<T, F>(&self, f: F) -> Result<T, ReconcileError>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T, ReconcileError>,
    {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Read-only access for queries not covered by the typed getters.
    pub fn with_connection<T, F>(&self, f: F) -> Result<T, ReconcileError>
    where
        F: FnOnce(&Connection) -> rusqlite::Result<T>,
    {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// Insert a node as produced by the capture pipeline (thread fields null).
    pub fn insert_node(&self, node: &NewNode) -> Result<(), ReconcileError> {
        let app_context = node.app_context.as_ref().map(serde_json::to_string).transpose()?;
        let knowledge = node.knowledge.as_ref().map(serde_json::to_string).transpose()?;
        let state_snapshot = node.state_snapshot.as_ref().map(|v| v.to_string());
        let keywords = serde_json::to_string(&node.keywords)?;
        let now = chrono::Utc::now().timestamp_millis();

        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO nodes (id, timestamp, title, summary, app_context, knowledge,
                                state_snapshot, keywords, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                node.id,
                node.timestamp,
                node.title,
                node.summary,
                app_context,
                knowledge,
                state_snapshot,
                keywords,
                now,
            ],
        )?;

        Ok(())
    }

    /// Register a pending batch over existing nodes; order defines node indices.
    pub fn create_batch<S: AsRef<str>>(
        &self,
        batch_id: &str,
        node_ids: &[S],
    ) -> Result<(), ReconcileError> {
        let now = chrono::Utc::now().timestamp_millis();

        self.write_transaction(|tx| {
            tx.execute(
                "INSERT INTO batches (id, status, attempts, created_at, updated_at)
                 VALUES (?1, ?2, 0, ?3, ?3)",
                params![batch_id, BatchStatus::Pending, now],
            )?;

            let mut stmt = tx.prepare_cached(
                "INSERT INTO batch_nodes (batch_id, position, node_id) VALUES (?1, ?2, ?3)",
            )?;
            for (position, node_id) in node_ids.iter().enumerate() {
                stmt.execute(params![batch_id, position as i64, node_id.as_ref()])?;
            }

            Ok(())
        })?;

        log::debug!("📦 Batch {} created with {} nodes", batch_id, node_ids.len());
        Ok(())
    }

    pub fn get_thread(&self, thread_id: &str) -> Result<Option<Thread>, ReconcileError> {
        let conn = self.lock()?;
        Ok(load_thread(&conn, thread_id)?)
    }

    pub fn get_node(&self, node_id: &str) -> Result<Option<NodeRecord>, ReconcileError> {
        let conn = self.lock()?;
        let node = conn
            .query_row(
                &format!("SELECT {} FROM nodes WHERE id = ?1", NODE_COLUMNS),
                [node_id],
                node_from_row,
            )
            .optional()?;
        Ok(node)
    }

    pub fn get_batch(&self, batch_id: &str) -> Result<Option<Batch>, ReconcileError> {
        let conn = self.lock()?;
        Ok(load_batch(&conn, batch_id)?)
    }

    /// Full node records of a batch, in proposal order.
    pub fn batch_node_records(&self, batch_id: &str) -> Result<Vec<NodeRecord>, ReconcileError> {
        let conn = self.lock()?;
        // node column names do not clash with batch_nodes columns
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM batch_nodes bn JOIN nodes n ON n.id = bn.node_id
             WHERE bn.batch_id = ?1 ORDER BY bn.position ASC",
            NODE_COLUMNS
        ))?;
        let nodes = stmt
            .query_map([batch_id], node_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(nodes)
    }

    /// Threads in a given status, most recently active first.
    pub fn threads_with_status(&self, status: ThreadStatus) -> Result<Vec<Thread>, ReconcileError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM threads WHERE status = ?1 ORDER BY last_active_at DESC, id ASC",
            THREAD_COLUMNS
        ))?;
        let threads = stmt
            .query_map([status], thread_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(threads)
    }

    pub fn batch_progress(&self, batch_id: &str) -> Result<BatchProgress, ReconcileError> {
        let conn = self.lock()?;
        if load_batch(&conn, batch_id)?.is_none() {
            return Err(ReferentialError::UnknownBatch(batch_id.to_string()).into());
        }

        let nodes = load_batch_nodes(&conn, batch_id)?;
        Ok(BatchProgress {
            total: nodes.len(),
            assigned: nodes.iter().filter(|n| n.thread_id.is_some()).count(),
        })
    }

    /// Batches ready for a reconciliation attempt, oldest first.
    ///
    /// Pending batches are always due; failed ones only once their retry time
    /// has passed. Failed batches without a retry time are parked.
    pub fn due_batches(&self, now: i64, limit: usize) -> Result<Vec<String>, ReconcileError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT id FROM batches
             WHERE status = ?1
                OR (status = ?2 AND next_retry_at IS NOT NULL AND next_retry_at <= ?3)
             ORDER BY created_at ASC, id ASC
             LIMIT ?4",
        )?;
        let ids = stmt
            .query_map(
                params![BatchStatus::Pending, BatchStatus::Failed, now, limit as i64],
                |row| row.get::<_, String>(0),
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    /// Record a failed attempt for the scheduler. Never touches a succeeded batch.
    ///
    /// Returns false when the batch is unknown or already succeeded.
    pub fn record_batch_failure(
        &self,
        batch_id: &str,
        message: &str,
        next_retry_at: Option<i64>,
        now: i64,
    ) -> Result<bool, ReconcileError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE batches
             SET status = ?1, error_message = ?2, next_retry_at = ?3,
                 attempts = attempts + 1, updated_at = ?4
             WHERE id = ?5 AND status <> ?6",
            params![
                BatchStatus::Failed,
                message,
                next_retry_at,
                now,
                batch_id,
                BatchStatus::Succeeded,
            ],
        )?;
        Ok(changed > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::types::AppContext;
    use tempfile::tempdir;

    fn node(id: &str, timestamp: i64) -> NewNode {
        NewNode {
            id: id.to_string(),
            timestamp,
            title: format!("title {}", id),
            summary: format!("summary {}", id),
            app_context: Some(AppContext {
                app_name: "Terminal".to_string(),
                ..Default::default()
            }),
            keywords: vec!["cargo".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn test_open_creates_schema_and_parent_dir() {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("nested").join("threads.db");

        let store = ThreadStore::open(&db_path).unwrap();
        assert!(db_path.exists());

        let tables: i64 = store
            .with_connection(|conn| {
                conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master
                     WHERE type = 'table' AND name IN ('threads', 'nodes', 'batches', 'batch_nodes')",
                    [],
                    |row| row.get(0),
                )
            })
            .unwrap();
        assert_eq!(tables, 4);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let store = ThreadStore::open_in_memory().unwrap();
        store.with_connection(|conn| run_schema_migrations(conn)).unwrap();
        store.with_connection(|conn| run_schema_migrations(conn)).unwrap();
    }

    #[test]
    fn test_insert_node_and_batch_order() {
        let store = ThreadStore::open_in_memory().unwrap();
        store.insert_node(&node("n2", 2_000)).unwrap();
        store.insert_node(&node("n1", 1_000)).unwrap();
        store.create_batch("b1", &["n2", "n1"]).unwrap();

        let records = store.batch_node_records("b1").unwrap();
        let ids: Vec<&str> = records.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["n2", "n1"]);
        assert!(records.iter().all(|n| n.thread_id.is_none() && n.thread_snapshot.is_none()));
        assert_eq!(records[0].context().app.app_name, "Terminal");

        let batch = store.get_batch("b1").unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Pending);
        assert_eq!(batch.attempts, 0);

        let progress = store.batch_progress("b1").unwrap();
        assert_eq!(progress, BatchProgress { total: 2, assigned: 0 });
    }

    #[test]
    fn test_batch_progress_unknown_batch() {
        let store = ThreadStore::open_in_memory().unwrap();
        let err = store.batch_progress("missing").unwrap_err();
        assert!(matches!(
            err,
            ReconcileError::Referential(ReferentialError::UnknownBatch(_))
        ));
    }

    #[test]
    fn test_create_batch_rejects_unknown_node() {
        let store = ThreadStore::open_in_memory().unwrap();
        let result = store.create_batch("b1", &["ghost"]);
        assert!(result.is_err());
        // The batch row itself was rolled back with the failed membership insert
        assert!(store.get_batch("b1").unwrap().is_none());
    }

    #[test]
    fn test_failure_recording_and_due_batches() {
        let store = ThreadStore::open_in_memory().unwrap();
        store.insert_node(&node("n1", 1_000)).unwrap();
        store.insert_node(&node("n2", 2_000)).unwrap();
        store.create_batch("b_pending", &["n1"]).unwrap();
        store.create_batch("b_failed", &["n2"]).unwrap();

        let recorded = store
            .record_batch_failure("b_failed", "model timeout", Some(50_000), 10_000)
            .unwrap();
        assert!(recorded);

        let batch = store.get_batch("b_failed").unwrap().unwrap();
        assert_eq!(batch.status, BatchStatus::Failed);
        assert_eq!(batch.error_message.as_deref(), Some("model timeout"));
        assert_eq!(batch.next_retry_at, Some(50_000));
        assert_eq!(batch.attempts, 1);

        assert_eq!(store.due_batches(20_000, 10).unwrap(), vec!["b_pending"]);
        let due_later = store.due_batches(60_000, 10).unwrap();
        assert_eq!(due_later.len(), 2);
        assert!(due_later.contains(&"b_failed".to_string()));

        // Parked: failed without retry time
        store.record_batch_failure("b_failed", "gave up", None, 70_000).unwrap();
        assert_eq!(store.due_batches(1_000_000, 10).unwrap(), vec!["b_pending"]);
    }

    #[test]
    fn test_failure_never_overwrites_success() {
        let store = ThreadStore::open_in_memory().unwrap();
        store.insert_node(&node("n1", 1_000)).unwrap();
        store.create_batch("b1", &["n1"]).unwrap();

        store
            .write_transaction(|tx| Ok(mark_batch_succeeded(tx, "b1", 5_000)?))
            .unwrap();

        let recorded = store.record_batch_failure("b1", "late error", Some(1), 6_000).unwrap();
        assert!(!recorded);
        assert_eq!(store.get_batch("b1").unwrap().unwrap().status, BatchStatus::Succeeded);
    }

    #[test]
    fn test_mark_succeeded_is_noop_when_clean() {
        let store = ThreadStore::open_in_memory().unwrap();
        store.insert_node(&node("n1", 1_000)).unwrap();
        store.create_batch("b1", &["n1"]).unwrap();

        let first = store
            .write_transaction(|tx| Ok(mark_batch_succeeded(tx, "b1", 5_000)?))
            .unwrap();
        let second = store
            .write_transaction(|tx| Ok(mark_batch_succeeded(tx, "b1", 9_000)?))
            .unwrap();

        assert!(first);
        assert!(!second);
        assert_eq!(store.get_batch("b1").unwrap().unwrap().updated_at, 5_000);
    }

    #[test]
    fn test_write_transaction_rolls_back_on_error() {
        let store = ThreadStore::open_in_memory().unwrap();
        store.insert_node(&node("n1", 1_000)).unwrap();

        let result: Result<(), ReconcileError> = store.write_transaction(|tx| {
            tx.execute("UPDATE nodes SET title = 'changed' WHERE id = 'n1'", [])?;
            Err(ReferentialError::UnknownThread("thr_x".into()).into())
        });

        assert!(result.is_err());
        assert_eq!(store.get_node("n1").unwrap().unwrap().title, "title n1");
    }

    #[test]
    fn test_thread_id_trigger_enforces_write_once() {
        let store = ThreadStore::open_in_memory().unwrap();
        store.insert_node(&node("n1", 1_000)).unwrap();
        store
            .with_connection(|conn| {
                conn.execute(
                    "INSERT INTO threads (id, origin_key, title, start_time, last_active_at,
                                          created_at, updated_at)
                     VALUES ('thr_a', 'k_a', 'A', 0, 0, 0, 0), ('thr_b', 'k_b', 'B', 0, 0, 0, 0)",
                    [],
                )?;
                conn.execute("UPDATE nodes SET thread_id = 'thr_a' WHERE id = 'n1'", [])
            })
            .unwrap();

        let overwrite = store.with_connection(|conn| {
            conn.execute("UPDATE nodes SET thread_id = 'thr_b' WHERE id = 'n1'", [])
        });
        assert!(overwrite.is_err());

        let cleared = store.with_connection(|conn| {
            conn.execute("UPDATE nodes SET thread_id = NULL WHERE id = 'n1'", [])
        });
        assert!(cleared.is_err());

        assert_eq!(
            store.get_node("n1").unwrap().unwrap().thread_id.as_deref(),
            Some("thr_a")
        );
    }
}

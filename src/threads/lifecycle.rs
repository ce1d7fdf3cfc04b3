//! Time-based thread lifecycle transitions.

use super::types::ThreadStatus;
use rusqlite::{params, Connection};

/// Move every `active` thread idle for longer than `inactivity_threshold_ms`
/// to `inactive`. Never touches other statuses. Returns the number changed.
pub fn sweep_inactive_threads(
    conn: &Connection,
    now: i64,
    inactivity_threshold_ms: i64,
) -> rusqlite::Result<usize> {
    let cutoff = now.saturating_sub(inactivity_threshold_ms);
    conn.execute(
        "UPDATE threads SET status = ?1, updated_at = ?2
         WHERE status = ?3 AND last_active_at < ?4",
        params![ThreadStatus::Inactive, now, ThreadStatus::Active, cutoff],
    )
}

/// Bring `inactive` threads that just gained members back to `active`.
///
/// `closed` threads keep their status.
pub fn reactivate_threads<S: AsRef<str>>(
    conn: &Connection,
    thread_ids: &[S],
    now: i64,
) -> rusqlite::Result<usize> {
    let mut stmt = conn.prepare_cached(
        "UPDATE threads SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
    )?;

    let mut changed = 0;
    for thread_id in thread_ids {
        changed += stmt.execute(params![
            ThreadStatus::Active,
            now,
            thread_id.as_ref(),
            ThreadStatus::Inactive
        ])?;
    }
    Ok(changed)
}

//! Thread statistics recomputation.
//!
//! Every call rebuilds a thread's aggregate fields from scratch; nothing is
//! accumulated as a delta, so re-running is always safe.
//!
//! Two scopes, on purpose:
//! - full membership: `start_time`, `last_active_at`, `node_count`, `duration_ms`
//! - the `recent_nodes_window` most recent members: `apps`, `key_entities`
//!
//! The window bounds the cost of recomputing long-lived threads; older
//! members stop influencing the app and entity lists.

use super::config::ReconcileConfig;
use super::types::NodeContext;
use rusqlite::{params, Connection};
use std::collections::HashMap;

/// Recomputed aggregate fields of one thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStats {
    pub start_time: i64,
    pub last_active_at: i64,
    pub node_count: i64,
    pub duration_ms: i64,
    pub apps: Vec<String>,
    pub key_entities: Vec<String>,
}

/// Continuous engaged time over ascending timestamps.
///
/// Sums the gaps between consecutive timestamps, skipping any gap larger
/// than `gap_threshold_ms` (the user was away).
pub fn continuous_duration_ms(sorted_timestamps: &[i64], gap_threshold_ms: i64) -> i64 {
    sorted_timestamps
        .windows(2)
        .map(|pair| pair[1].saturating_sub(pair[0]))
        .filter(|gap| *gap <= gap_threshold_ms)
        .sum()
}

/// Rank names by frequency (desc), then by name (asc), and keep the top `limit`.
fn rank_by_frequency<'a, I>(names: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for name in names {
        let name = name.trim();
        if !name.is_empty() {
            *counts.entry(name).or_insert(0) += 1;
        }
    }

    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    ranked
        .into_iter()
        .take(limit)
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Applications seen in the given member contexts.
pub fn derive_apps(contexts: &[NodeContext], max_apps: usize) -> Vec<String> {
    rank_by_frequency(contexts.iter().map(|c| c.app.app_name.as_str()), max_apps)
}

/// Knowledge entities and keywords of the given member contexts.
pub fn derive_key_entities(contexts: &[NodeContext], max_entities: usize) -> Vec<String> {
    let names = contexts.iter().flat_map(|c| {
        c.knowledge
            .entities
            .iter()
            .map(|e| e.name())
            .chain(c.keywords.iter().map(String::as_str))
    });
    rank_by_frequency(names, max_entities)
}

fn member_timestamps(conn: &Connection, thread_id: &str) -> rusqlite::Result<Vec<i64>> {
    let mut stmt = conn.prepare_cached(
        "SELECT timestamp FROM nodes WHERE thread_id = ?1 ORDER BY timestamp ASC",
    )?;
    let timestamps = stmt
        .query_map([thread_id], |row| row.get::<_, i64>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(timestamps)
}

fn recent_member_contexts(
    conn: &Connection,
    thread_id: &str,
    window: usize,
) -> rusqlite::Result<Vec<NodeContext>> {
    let mut stmt = conn.prepare_cached(
        "SELECT app_context, knowledge, keywords FROM nodes
         WHERE thread_id = ?1
         ORDER BY timestamp DESC, id DESC
         LIMIT ?2",
    )?;
    let contexts = stmt
        .query_map(params![thread_id, window as i64], |row| {
            let app_context: Option<String> = row.get(0)?;
            let knowledge: Option<String> = row.get(1)?;
            let keywords: Option<String> = row.get(2)?;
            Ok(NodeContext::from_columns(
                app_context.as_deref(),
                knowledge.as_deref(),
                keywords.as_deref(),
            ))
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(contexts)
}

/// Compute fresh stats for one thread from its current membership.
///
/// Returns `None` for a thread without members (nothing to derive from).
pub fn compute_thread_stats(
    conn: &Connection,
    thread_id: &str,
    config: &ReconcileConfig,
) -> rusqlite::Result<Option<ThreadStats>> {
    let timestamps = member_timestamps(conn, thread_id)?;
    let (Some(&start_time), Some(&last_active_at)) = (timestamps.first(), timestamps.last())
    else {
        return Ok(None);
    };

    let contexts = recent_member_contexts(conn, thread_id, config.recent_nodes_window)?;

    Ok(Some(ThreadStats {
        start_time,
        last_active_at,
        node_count: timestamps.len() as i64,
        duration_ms: continuous_duration_ms(&timestamps, config.gap_threshold_ms),
        apps: derive_apps(&contexts, config.max_apps),
        key_entities: derive_key_entities(&contexts, config.max_key_entities),
    }))
}

/// Recompute and store a thread's aggregates.
///
/// The row is only written when something changed, so repeated calls over
/// unchanged membership leave `updated_at` alone. Returns whether it wrote.
pub fn recompute_thread(
    conn: &Connection,
    thread_id: &str,
    config: &ReconcileConfig,
    now: i64,
) -> Result<bool, super::error::ReconcileError> {
    let Some(stats) = compute_thread_stats(conn, thread_id, config)? else {
        log::debug!("Thread {} has no members, aggregates left as-is", thread_id);
        return Ok(false);
    };

    let current = super::db::load_thread(conn, thread_id)?.map(|t| ThreadStats {
        start_time: t.start_time,
        last_active_at: t.last_active_at,
        node_count: t.node_count,
        duration_ms: t.duration_ms,
        apps: t.apps,
        key_entities: t.key_entities,
    });
    if current.as_ref() == Some(&stats) {
        log::debug!("Thread {} aggregates unchanged", thread_id);
        return Ok(false);
    }

    conn.execute(
        "UPDATE threads
         SET start_time = ?1, last_active_at = ?2, node_count = ?3, duration_ms = ?4,
             apps = ?5, key_entities = ?6, updated_at = ?7
         WHERE id = ?8",
        params![
            stats.start_time,
            stats.last_active_at,
            stats.node_count,
            stats.duration_ms,
            serde_json::to_string(&stats.apps)?,
            serde_json::to_string(&stats.key_entities)?,
            now,
            thread_id,
        ],
    )?;

    log::debug!(
        "📈 Thread {}: {} nodes, {}ms continuous",
        thread_id,
        stats.node_count,
        stats.duration_ms
    );
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::threads::types::{AppContext, EntityRef, Knowledge};

    const MINUTE: i64 = 60 * 1000;

    fn ctx(app: &str, entities: &[&str], keywords: &[&str]) -> NodeContext {
        NodeContext {
            app: AppContext {
                app_name: app.to_string(),
                ..Default::default()
            },
            knowledge: Knowledge {
                summary: None,
                entities: entities.iter().map(|e| EntityRef::Name(e.to_string())).collect(),
            },
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
        }
    }

    #[test]
    fn test_duration_excludes_idle_gaps() {
        let timestamps = [1000, 1000 + 5 * MINUTE, 1000 + 25 * MINUTE, 1000 + 27 * MINUTE];
        assert_eq!(
            continuous_duration_ms(&timestamps, 10 * MINUTE),
            5 * MINUTE + 2 * MINUTE
        );
    }

    #[test]
    fn test_duration_gap_equal_to_threshold_counts() {
        let timestamps = [0, 10 * MINUTE];
        assert_eq!(continuous_duration_ms(&timestamps, 10 * MINUTE), 10 * MINUTE);
    }

    #[test]
    fn test_duration_of_single_or_no_timestamp_is_zero() {
        assert_eq!(continuous_duration_ms(&[], 10 * MINUTE), 0);
        assert_eq!(continuous_duration_ms(&[42], 10 * MINUTE), 0);
    }

    #[test]
    fn test_duration_survives_extreme_timestamps() {
        // Saturates to a huge gap, which is then excluded as idle
        assert_eq!(continuous_duration_ms(&[i64::MIN, i64::MAX], 5 * MINUTE), 0);
        assert_eq!(continuous_duration_ms(&[i64::MAX - MINUTE, i64::MAX], 5 * MINUTE), MINUTE);
    }

    #[test]
    fn test_apps_ranked_by_frequency_then_name() {
        let contexts = vec![
            ctx("Terminal", &[], &[]),
            ctx("Chrome", &[], &[]),
            ctx("Chrome", &[], &[]),
            ctx("Arc", &[], &[]),
            ctx("", &[], &[]),
        ];

        assert_eq!(derive_apps(&contexts, 5), vec!["Chrome", "Arc", "Terminal"]);
        assert_eq!(derive_apps(&contexts, 2), vec!["Chrome", "Arc"]);
    }

    #[test]
    fn test_entities_merge_knowledge_and_keywords() {
        let contexts = vec![
            ctx("Code", &["auth-service", "JWT"], &["login"]),
            ctx("Code", &["auth-service"], &["JWT", " "]),
            ctx("Code", &[], &["redis"]),
        ];

        assert_eq!(
            derive_key_entities(&contexts, 3),
            vec!["JWT", "auth-service", "login"]
        );
    }
}

//! Reconciler tuning from environment variables

use std::env;

/// Tuning parameters for aggregation and lifecycle
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// Largest gap between consecutive member timestamps still counted as continuous activity
    pub gap_threshold_ms: i64,

    /// Active threads idle longer than this become inactive
    pub inactivity_threshold_ms: i64,

    /// Number of most recent members used to derive apps and key entities
    pub recent_nodes_window: usize,

    /// Cap on a thread's application list
    pub max_apps: usize,

    /// Cap on a thread's key entity list
    pub max_key_entities: usize,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            gap_threshold_ms: 10 * 60 * 1000,
            inactivity_threshold_ms: 60 * 60 * 1000,
            recent_nodes_window: 50,
            max_apps: 5,
            max_key_entities: 10,
        }
    }
}

impl ReconcileConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `THREAD_GAP_THRESHOLD_MS` (default: 600000)
    /// - `THREAD_INACTIVITY_THRESHOLD_MS` (default: 3600000)
    /// - `THREAD_RECENT_NODES_WINDOW` (default: 50)
    /// - `THREAD_MAX_APPS` (default: 5)
    /// - `THREAD_MAX_KEY_ENTITIES` (default: 10)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            gap_threshold_ms: env_or("THREAD_GAP_THRESHOLD_MS", defaults.gap_threshold_ms),
            inactivity_threshold_ms: env_or(
                "THREAD_INACTIVITY_THRESHOLD_MS",
                defaults.inactivity_threshold_ms,
            ),
            recent_nodes_window: env_or("THREAD_RECENT_NODES_WINDOW", defaults.recent_nodes_window),
            max_apps: env_or("THREAD_MAX_APPS", defaults.max_apps),
            max_key_entities: env_or("THREAD_MAX_KEY_ENTITIES", defaults.max_key_entities),
        }
    }
}

pub(crate) fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

//! Runtime configuration from environment variables

use crate::threads::config::env_or;
use std::env;

/// Configuration for the reconciliation daemon
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Path to SQLite database file
    pub db_path: String,

    /// Directory holding `<batch_id>.json` proposal files
    pub proposals_dir: String,

    /// Due-batch poll interval in milliseconds
    pub poll_interval_ms: u64,

    /// Inactivity sweep interval in milliseconds
    pub sweep_interval_ms: u64,

    /// Max batches handled per pass
    pub batch_limit: usize,

    /// First retry delay after a failed batch
    pub retry_initial_delay_ms: i64,

    /// Upper bound on the retry delay
    pub retry_max_delay_ms: i64,

    /// Failed attempts after which a batch is parked
    pub retry_max_attempts: u32,

    /// Master enable flag for the reconciler
    pub enabled: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            db_path: "/var/lib/threadflow/threadflow.db".to_string(),
            proposals_dir: "proposals".to_string(),
            poll_interval_ms: 5_000,
            sweep_interval_ms: 60_000,
            batch_limit: 10,
            retry_initial_delay_ms: 30_000,
            retry_max_delay_ms: 3_600_000,
            retry_max_attempts: 5,
            enabled: false,
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `THREADFLOW_DB_PATH` (default: /var/lib/threadflow/threadflow.db)
    /// - `THREADFLOW_PROPOSALS_DIR` (default: proposals)
    /// - `RECONCILE_POLL_INTERVAL_MS` (default: 5000)
    /// - `SWEEP_INTERVAL_MS` (default: 60000)
    /// - `RECONCILE_BATCH_LIMIT` (default: 10)
    /// - `RETRY_INITIAL_DELAY_MS` (default: 30000)
    /// - `RETRY_MAX_DELAY_MS` (default: 3600000)
    /// - `RETRY_MAX_ATTEMPTS` (default: 5)
    /// - `ENABLE_RECONCILER` (default: false)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            db_path: env::var("THREADFLOW_DB_PATH").unwrap_or(defaults.db_path),
            proposals_dir: env::var("THREADFLOW_PROPOSALS_DIR").unwrap_or(defaults.proposals_dir),
            poll_interval_ms: env_or("RECONCILE_POLL_INTERVAL_MS", defaults.poll_interval_ms),
            sweep_interval_ms: env_or("SWEEP_INTERVAL_MS", defaults.sweep_interval_ms),
            batch_limit: env_or("RECONCILE_BATCH_LIMIT", defaults.batch_limit),
            retry_initial_delay_ms: env_or("RETRY_INITIAL_DELAY_MS", defaults.retry_initial_delay_ms),
            retry_max_delay_ms: env_or("RETRY_MAX_DELAY_MS", defaults.retry_max_delay_ms),
            retry_max_attempts: env_or("RETRY_MAX_ATTEMPTS", defaults.retry_max_attempts),
            enabled: env_or("ENABLE_RECONCILER", defaults.enabled),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        env::remove_var("THREADFLOW_DB_PATH");
        env::remove_var("ENABLE_RECONCILER");
        env::remove_var("RECONCILE_BATCH_LIMIT");

        let config = RuntimeConfig::from_env();

        assert_eq!(config.db_path, "/var/lib/threadflow/threadflow.db");
        assert_eq!(config.batch_limit, 10);
        assert!(!config.enabled);
    }
}

//! Threadflow Runtime - reconciliation daemon
//!
//! This binary drives the thread reconciler:
//! - Opens the SQLite database and applies the schema
//! - Picks up due batches and applies their proposals
//! - Retries failed batches with exponential backoff
//! - Periodically marks idle threads inactive
//!
//! Usage:
//!   cargo run --release --bin threadflow_runtime
//!
//! Environment variables:
//!   THREADFLOW_DB_PATH - SQLite database path (default: /var/lib/threadflow/threadflow.db)
//!   THREADFLOW_PROPOSALS_DIR - Proposal files directory (default: proposals)
//!   ENABLE_RECONCILER - Master switch (default: false)
//!   RECONCILE_POLL_INTERVAL_MS - Pass interval (default: 5000)
//!   SWEEP_INTERVAL_MS - Inactivity sweep interval (default: 60000)
//!   THREAD_GAP_THRESHOLD_MS, THREAD_INACTIVITY_THRESHOLD_MS - see ReconcileConfig

use dotenv::dotenv;
use log::{error, info};
use std::sync::Arc;
use threadflow::runtime::{
    reconcile_scheduler_task, sweep_scheduler_task, FileProposalSource, ProposalSource,
    RetryBackoff, RuntimeConfig,
};
use threadflow::threads::{ReconcileConfig, ThreadReconciler, ThreadStore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize environment and logging
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    info!("🚀 Threadflow Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = RuntimeConfig::from_env();

    if !config.enabled {
        info!("⚠️  Reconciler is DISABLED (set ENABLE_RECONCILER=true to activate)");
        info!("   └─ Exiting gracefully...");
        return Ok(());
    }

    let reconcile_config = ReconcileConfig::from_env();

    info!("✅ Reconciler ENABLED");
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Proposals: {}", config.proposals_dir);
    info!("   ├─ Poll interval: {}ms", config.poll_interval_ms);
    info!("   ├─ Sweep interval: {}ms", config.sweep_interval_ms);
    info!("   ├─ Gap threshold: {}ms", reconcile_config.gap_threshold_ms);
    info!("   └─ Inactivity threshold: {}ms", reconcile_config.inactivity_threshold_ms);

    // Initialize database (migrations are idempotent)
    info!("🔧 Initializing database...");
    let store = ThreadStore::open(&config.db_path)?;
    let reconciler = Arc::new(ThreadReconciler::new(store, reconcile_config));
    info!("✅ ThreadReconciler created");

    let source: Arc<dyn ProposalSource> =
        Arc::new(FileProposalSource::new(config.proposals_dir.clone()));
    let backoff = RetryBackoff::new(
        config.retry_initial_delay_ms,
        config.retry_max_delay_ms,
        config.retry_max_attempts,
    );

    info!("🚀 Spawning background tasks...");

    let reconcile_handle = tokio::spawn(reconcile_scheduler_task(
        reconciler.clone(),
        source,
        backoff,
        config.batch_limit,
        config.poll_interval_ms,
    ));
    info!("   ├─ ✅ Reconcile scheduler spawned");

    let sweep_handle = tokio::spawn(sweep_scheduler_task(
        reconciler.clone(),
        config.sweep_interval_ms,
    ));
    info!("   └─ ✅ Inactivity sweep spawned");

    info!("🔄 Press CTRL+C to shutdown gracefully");

    // Wait for CTRL+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            info!("");
            info!("⚠️  Received CTRL+C, shutting down...");
        }
        Err(err) => {
            error!("❌ Failed to listen for CTRL+C: {}", err);
        }
    }

    // Each pass commits or rolls back as a whole, so aborting between ticks is safe
    reconcile_handle.abort();
    sweep_handle.abort();

    info!("✅ Threadflow runtime stopped");
    Ok(())
}

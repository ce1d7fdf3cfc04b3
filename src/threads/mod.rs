//! # Thread Reconciliation Engine
//!
//! Merges externally proposed groupings of activity nodes into persistent
//! threads, exactly once, across crashes and retries.
//!
//! ## Guarantees
//!
//! - A node's `thread_id` and `thread_snapshot` are write-once (enforced by
//!   SQLite triggers as well as by `... IS NULL` guards).
//! - New threads are deduplicated by `origin_key` (batch id + sorted member
//!   indices); their `id` stays random and is never recomputed.
//! - Thread aggregates are always a full recomputation over current
//!   membership, so re-running is convergent.
//! - All writes of one batch happen in one transaction.
//!
//! ## Module Organization
//!
//! - `types` - Nodes, threads, batches, parsed node context
//! - `proposal` - Untrusted proposal shape (serde)
//! - `error` - Typed error taxonomy
//! - `config` - Tunables from environment
//! - `db` - `ThreadStore` repository and schema migrations
//! - `validator` - Structural proposal checks
//! - `materializer` - Idempotent new-thread creation
//! - `resolver` - Node index → thread id mapping
//! - `aggregator` - Duration / membership / app / entity recomputation
//! - `snapshot` - Write-once snapshot embedding
//! - `lifecycle` - Inactivity sweep and reactivation
//! - `engine` - `ThreadReconciler`, the transactional entry point

pub mod types;
pub mod proposal;
pub mod error;
pub mod config;
pub mod db;
pub mod validator;
pub mod materializer;
pub mod resolver;
pub mod aggregator;
pub mod snapshot;
pub mod lifecycle;
pub mod engine;

// Re-export commonly used types
pub use types::{Batch, BatchStatus, Milestone, NewNode, NodeRecord, Thread, ThreadSnapshot, ThreadStatus};
pub use proposal::{ClusteringProposal, NewThreadDef, NodeAssignment, ThreadPatch, ThreadTarget};
pub use error::{ErrorKind, ReconcileError};
pub use config::ReconcileConfig;
pub use db::ThreadStore;
pub use engine::{ReconcileOutcome, ReconcileResult, ThreadReconciler};

//! # Reconciliation Runtime
//!
//! Scheduler-side plumbing around [`crate::threads::ThreadReconciler`]:
//! decides when batches are reconciled, where proposals come from, and when
//! failed batches are retried. The engine never retries on its own.
//!
//! ## Module Organization
//!
//! - `config` - Daemon settings from environment
//! - `proposal_source` - `ProposalSource` trait and file-backed source
//! - `backoff` - Retry delays for failed batches
//! - `scheduler` - Reconcile pass and background loops

pub mod config;
pub mod proposal_source;
pub mod backoff;
pub mod scheduler;

pub use config::RuntimeConfig;
pub use proposal_source::{FileProposalSource, ProposalRequest, ProposalSource, ProposalSourceError};
pub use backoff::RetryBackoff;
pub use scheduler::{reconcile_scheduler_task, run_reconcile_pass, sweep_scheduler_task, PassReport};

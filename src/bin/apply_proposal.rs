//! Apply one proposal file to one batch and print the result as JSON.
//!
//! Usage:
//!   apply_proposal --batch <BATCH_ID> --proposal <FILE> [--db <PATH>]
//!
//! `--db` defaults to `THREADFLOW_DB_PATH`. Logs go to stderr, the
//! `ReconcileResult` to stdout.

use dotenv::dotenv;
use threadflow::runtime::RuntimeConfig;
use threadflow::threads::{ReconcileConfig, ThreadReconciler, ThreadStore};

const USAGE: &str = "Usage: apply_proposal --batch <BATCH_ID> --proposal <FILE> [--db <PATH>]";

/// Command-line configuration
struct ApplyArgs {
    batch_id: String,
    proposal_path: String,
    db_path: String,
}

impl ApplyArgs {
    fn from_env_and_args() -> Result<Self, Box<dyn std::error::Error>> {
        let args: Vec<String> = std::env::args().collect();
        let flag = |name: &str| {
            args.windows(2)
                .find(|w| w[0] == name)
                .map(|w| w[1].clone())
        };

        let batch_id = flag("--batch").ok_or(format!("Missing --batch argument. {}", USAGE))?;
        let proposal_path =
            flag("--proposal").ok_or(format!("Missing --proposal argument. {}", USAGE))?;
        let db_path = flag("--db").unwrap_or_else(|| RuntimeConfig::from_env().db_path);

        Ok(Self {
            batch_id,
            proposal_path,
            db_path,
        })
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let args = ApplyArgs::from_env_and_args()?;
    let raw = std::fs::read_to_string(&args.proposal_path)
        .map_err(|e| format!("Cannot read {}: {}", args.proposal_path, e))?;

    let store = ThreadStore::open(&args.db_path)?;
    let reconciler = ThreadReconciler::new(store, ReconcileConfig::from_env());

    match reconciler.reconcile_batch_json(&args.batch_id, &raw) {
        Ok(result) => {
            println!("{}", serde_json::to_string_pretty(&result)?);
            Ok(())
        }
        Err(e) => {
            log::error!("❌ {} ({})", e, e.kind().as_str());
            std::process::exit(1);
        }
    }
}

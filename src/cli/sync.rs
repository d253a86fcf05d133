//! `sync` command: incremental/full reindex, verify, repair.

#![allow(clippy::print_stdout)]

use super::{EXIT_INCONSISTENT, parse_domain};
use crate::models::Domain;
use crate::services::Container;
use crate::{Error, Result};
use clap::Args;

/// Arguments for `engram sync`.
#[derive(Debug, Args)]
pub struct SyncArgs {
    /// incremental, full, verify, or repair.
    #[arg(long, default_value = "incremental")]
    pub mode: String,

    /// Report what would change without touching the index.
    #[arg(long)]
    pub dry_run: bool,

    /// Domain to sync.
    #[arg(long, default_value = "project")]
    pub domain: String,
}

/// Runs the sync command.
pub(crate) fn run(container: &Container, args: SyncArgs) -> Result<i32> {
    let domain: Domain = parse_domain(&args.domain)?;
    let service = container.sync_service(domain)?;

    match args.mode.as_str() {
        "incremental" | "full" => {
            let full = args.mode == "full";
            if args.dry_run {
                let verification = service.verify_consistency()?;
                println!(
                    "dry run: reindex ({}) would process {} drifted ids",
                    args.mode,
                    verification.drift_count()
                );
                return Ok(0);
            }
            let report = service.reindex(full)?;
            println!("reindexed {} records", report.processed);
            for error in &report.errors {
                println!("error: {error}");
            }
            Ok(0)
        },
        "verify" => {
            let verification = service.verify_consistency()?;
            if verification.is_consistent() {
                println!("index is consistent");
                return Ok(0);
            }
            println!(
                "index drift: {} missing, {} orphaned, {} mismatched",
                verification.missing_in_index.len(),
                verification.orphaned_in_index.len(),
                verification.content_mismatched.len()
            );
            for id in &verification.missing_in_index {
                println!("missing:    {id}");
            }
            for id in &verification.orphaned_in_index {
                println!("orphaned:   {id}");
            }
            for id in &verification.content_mismatched {
                println!("mismatched: {id}");
            }
            Ok(EXIT_INCONSISTENT)
        },
        "repair" => {
            let verification = service.verify_consistency()?;
            if args.dry_run {
                println!(
                    "dry run: repair would perform {} operations",
                    verification.drift_count()
                );
                return Ok(0);
            }
            let operations = service.repair(Some(verification))?;
            println!("repaired with {operations} operations");
            Ok(0)
        },
        other => Err(Error::Validation(format!(
            "unknown sync mode '{other}' (incremental, full, verify, repair)"
        ))),
    }
}

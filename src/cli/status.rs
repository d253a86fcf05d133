//! `status` command.

#![allow(clippy::print_stdout)]

use crate::models::Domain;
use crate::services::Container;
use crate::Result;
use clap::Args;

/// Arguments for `engram status`.
#[derive(Debug, Args)]
pub struct StatusArgs {
    /// Include per-namespace and per-spec breakdowns.
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

/// Runs the status command.
pub(crate) fn run(container: &Container, args: StatusArgs) -> Result<i32> {
    println!("data dir: {}", container.config().data_dir.display());
    println!(
        "embedding: {} ({} dims, {})",
        container
            .config()
            .embedding
            .model_id
            .as_deref()
            .unwrap_or("hashed"),
        container.config().embedding.dimensions,
        if container.embedder().is_loaded() {
            "loaded"
        } else {
            "not loaded"
        }
    );

    for domain in Domain::all() {
        // Only report domains that already have state on disk; status must
        // not create the user repository as a side effect.
        if *domain == Domain::User && !container.config().user_repo_path().exists() {
            println!("\n[{domain}] not initialized");
            continue;
        }
        let index = container.index_for(*domain)?;
        let stats = index.stats()?;

        println!("\n[{domain}]");
        println!("  memories: {}", stats.total);
        println!("  index size: {} bytes", stats.index_size_bytes);
        match stats.last_sync {
            Some(when) => println!("  last sync: {}", when.to_rfc3339()),
            None => println!("  last sync: never"),
        }

        if args.verbose {
            if !stats.by_namespace.is_empty() {
                println!("  by namespace:");
                for (namespace, count) in &stats.by_namespace {
                    println!("    {namespace}: {count}");
                }
            }
            if !stats.by_spec.is_empty() {
                println!("  by spec:");
                for (spec, count) in &stats.by_spec {
                    println!("    {spec}: {count}");
                }
            }
        }
    }
    Ok(0)
}

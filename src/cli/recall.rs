//! `recall` and `search-text` commands.

#![allow(clippy::print_stdout)]

use super::{parse_date, parse_domain, parse_mode, parse_namespace, parse_status};
use crate::models::{DetailLevel, MemoryResult, SearchFilter, SearchMode};
use crate::services::Container;
use crate::Result;
use clap::Args;

/// Arguments for `engram recall`.
#[derive(Debug, Args)]
pub struct RecallArgs {
    /// Query text.
    pub query: String,

    /// Number of results.
    #[arg(short, long, default_value_t = 5)]
    pub k: usize,

    /// Search mode (vector, text, hybrid).
    #[arg(long, default_value = "hybrid")]
    pub mode: String,

    /// Restrict to a namespace.
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// Restrict to a spec identifier.
    #[arg(long)]
    pub spec: Option<String>,

    /// Restrict to a domain; omit to search both.
    #[arg(long)]
    pub domain: Option<String>,

    /// Restrict to a status.
    #[arg(long)]
    pub status: Option<String>,

    /// Minimum vector similarity (0.0 to 1.0).
    #[arg(long)]
    pub min_similarity: Option<f32>,

    /// Only memories captured at or after this date.
    #[arg(long)]
    pub date_from: Option<String>,

    /// Only memories captured at or before this date.
    #[arg(long)]
    pub date_to: Option<String>,

    /// Hydrate each hit's full body from its note.
    #[arg(long)]
    pub full: bool,

    /// Emit JSON lines instead of text.
    #[arg(long)]
    pub json: bool,
}

impl RecallArgs {
    fn filter(&self) -> Result<SearchFilter> {
        let mut filter = SearchFilter::new();
        if let Some(raw) = &self.namespace {
            filter.namespace = Some(parse_namespace(raw)?);
        }
        filter.spec.clone_from(&self.spec);
        if let Some(raw) = &self.domain {
            filter.domain = Some(parse_domain(raw)?);
        }
        if let Some(raw) = &self.status {
            filter.status = Some(parse_status(raw)?);
        }
        filter.min_similarity = self.min_similarity;
        if let Some(raw) = &self.date_from {
            filter.date_from = Some(parse_date(raw)?);
        }
        if let Some(raw) = &self.date_to {
            filter.date_to = Some(parse_date(raw)?);
        }
        Ok(filter)
    }
}

/// Runs the recall command.
pub(crate) fn run(container: &Container, args: RecallArgs) -> Result<i32> {
    let filter = args.filter()?;
    let mode = parse_mode(&args.mode)?;
    let service = container.recall_service(filter.domain)?;

    let mut results = service.search(&args.query, args.k, &filter, mode)?;

    if args.full {
        for result in &mut results {
            let hydrated =
                service.hydrate(&result.memory.id, DetailLevel::Full, result.domain)?;
            result.memory = hydrated.memory;
        }
    }

    print_results(&results, args.json, args.full);
    Ok(0)
}

/// Arguments for `engram search-text`.
#[derive(Debug, Args)]
pub struct SearchTextArgs {
    /// Query text.
    pub query: String,

    /// Maximum results.
    #[arg(long, default_value_t = 10)]
    pub limit: usize,

    /// Restrict to a namespace.
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// Restrict to a spec identifier.
    #[arg(long)]
    pub spec: Option<String>,

    /// Restrict to a domain; omit to search both.
    #[arg(long)]
    pub domain: Option<String>,

    /// Emit JSON lines instead of text.
    #[arg(long)]
    pub json: bool,
}

/// Runs the keyword-only search command.
pub(crate) fn run_text(container: &Container, args: SearchTextArgs) -> Result<i32> {
    let mut filter = SearchFilter::new();
    if let Some(raw) = &args.namespace {
        filter.namespace = Some(parse_namespace(raw)?);
    }
    filter.spec.clone_from(&args.spec);
    if let Some(raw) = &args.domain {
        filter.domain = Some(parse_domain(raw)?);
    }

    let service = container.recall_service(filter.domain)?;
    let results = service.search(&args.query, args.limit, &filter, SearchMode::Text)?;
    print_results(&results, args.json, false);
    Ok(0)
}

fn print_results(results: &[MemoryResult], json: bool, with_body: bool) {
    if json {
        for result in results {
            let value = serde_json::json!({
                "id": result.memory.id.as_str(),
                "domain": result.domain.as_str(),
                "namespace": result.memory.namespace.as_str(),
                "summary": result.memory.summary,
                "content": with_body.then_some(&result.memory.content),
                "score": result.score,
                "status": result.memory.status.as_str(),
                "spec": result.memory.spec,
                "tags": result.memory.tags,
                "timestamp": result.memory.timestamp.to_rfc3339(),
            });
            println!("{value}");
        }
        return;
    }

    if results.is_empty() {
        println!("no memories found");
        return;
    }
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{:>2}. [{:.3}] {} ({}) {}",
            rank + 1,
            result.score,
            result.memory.id,
            result.memory.status,
            result.memory.summary
        );
        if with_body && !result.memory.content.is_empty() {
            for line in result.memory.content.lines() {
                println!("      {line}");
            }
        }
    }
}

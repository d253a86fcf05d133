//! `capture` and `transition` commands.

#![allow(clippy::print_stdout)]

use super::{parse_domain, parse_namespace, parse_status};
use crate::models::{CaptureInput, MemoryId};
use crate::services::Container;
use crate::{Error, Result};
use clap::Args;
use std::io::Read;

/// Arguments for `engram capture`.
#[derive(Debug, Args)]
pub struct CaptureArgs {
    /// Target namespace.
    #[arg(long, short = 'n')]
    pub namespace: String,

    /// One-line summary (max 100 characters).
    #[arg(long, short = 's')]
    pub summary: String,

    /// Markdown body; `-` reads from stdin.
    #[arg(long, short = 'c')]
    pub content: String,

    /// Spec identifier.
    #[arg(long)]
    pub spec: Option<String>,

    /// Tags (repeatable).
    #[arg(long = "tag")]
    pub tags: Vec<String>,

    /// Phase token.
    #[arg(long)]
    pub phase: Option<String>,

    /// Related memory ids (repeatable).
    #[arg(long = "relates-to")]
    pub relates_to: Vec<String>,

    /// Commit-ish to attach to (default HEAD).
    #[arg(long)]
    pub commit: Option<String>,

    /// Target domain (project or user).
    #[arg(long, default_value = "project")]
    pub domain: String,
}

/// Runs the capture command.
pub(crate) fn run(container: &Container, args: CaptureArgs) -> Result<i32> {
    let content = if args.content == "-" {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| Error::Validation(format!("reading stdin: {e}")))?;
        buffer
    } else {
        args.content
    };

    let domain = parse_domain(&args.domain)?;
    let input = CaptureInput {
        namespace: parse_namespace(&args.namespace)?,
        summary: args.summary,
        content,
        spec: args.spec,
        tags: args.tags,
        phase: args.phase,
        status: None,
        relates_to: args.relates_to.into_iter().map(MemoryId::new).collect(),
        commit: args.commit,
        domain,
        skip_lock: false,
    };

    let service = container.capture_service(domain)?;
    let result = service.capture(input)?;

    println!("captured {}", result.memory.id);
    if !result.indexed {
        println!("warning: not indexed; run `engram sync --mode repair`");
    }
    if let Some(warning) = result.warning {
        println!("warning: {warning}");
    }
    Ok(0)
}

/// Arguments for `engram transition`.
#[derive(Debug, Args)]
pub struct TransitionArgs {
    /// Memory id (`namespace:commit7:index`).
    pub id: String,

    /// Target status (resolved, archived, tombstone, active).
    pub status: String,

    /// Domain the memory lives in.
    #[arg(long, default_value = "project")]
    pub domain: String,
}

/// Runs the transition command.
pub(crate) fn run_transition(container: &Container, args: TransitionArgs) -> Result<i32> {
    let domain = parse_domain(&args.domain)?;
    let target = parse_status(&args.status)?;
    let service = container.capture_service(domain)?;
    let memory = service.transition(&MemoryId::new(args.id), target)?;
    println!("{} -> {}", memory.id, memory.status);
    Ok(0)
}

//! `audit` command: query the rotating audit log.

#![allow(clippy::print_stdout)]

use super::{parse_date, parse_namespace};
use crate::security::AuditKind;
use crate::services::Container;
use crate::{Error, Result};
use clap::Args;

/// Arguments for `engram audit`.
#[derive(Debug, Args)]
pub struct AuditArgs {
    /// Only events at or after this date.
    #[arg(long)]
    pub since: Option<String>,

    /// Restrict to one namespace.
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// Restrict to one kind (detection, filter, scan, allowlist).
    #[arg(long)]
    pub kind: Option<String>,

    /// Maximum events.
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Emit JSON lines instead of text.
    #[arg(long)]
    pub json: bool,

    /// Print aggregate counts instead of events.
    #[arg(long)]
    pub stats: bool,
}

/// Runs the audit command.
pub(crate) fn run(container: &Container, args: AuditArgs) -> Result<i32> {
    let logger = container.audit();

    if args.stats {
        let stats = logger.stats()?;
        println!("total: {}", stats.total);
        for (kind, count) in &stats.by_kind {
            println!("{kind}: {count}");
        }
        return Ok(0);
    }

    let since = args.since.as_deref().map(parse_date).transpose()?;
    let namespace = args.namespace.as_deref().map(parse_namespace).transpose()?;
    let kind = args
        .kind
        .as_deref()
        .map(|raw| {
            AuditKind::parse(raw).ok_or_else(|| {
                Error::Validation(format!(
                    "unknown audit kind '{raw}' (detection, filter, scan, allowlist)"
                ))
            })
        })
        .transpose()?;

    let events = logger.query(since, namespace, kind, args.limit)?;
    if args.json {
        for event in &events {
            let line =
                serde_json::to_string(event).map_err(|e| Error::Validation(e.to_string()))?;
            println!("{line}");
        }
        return Ok(0);
    }

    if events.is_empty() {
        println!("no audit events");
    }
    for event in &events {
        println!(
            "{} {} {} ns={} src={}",
            event.timestamp.to_rfc3339(),
            event.id,
            event.kind.as_str(),
            event.namespace.as_deref().unwrap_or("-"),
            event.source
        );
    }
    Ok(0)
}

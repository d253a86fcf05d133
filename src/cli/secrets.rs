//! `secrets` subcommands: scan existing notes, manage the allowlist.

#![allow(clippy::print_stdout)]

use super::{parse_domain, parse_namespace};
use crate::git::NoteCodec;
use crate::models::Namespace;
use crate::services::Container;
use crate::Result;
use clap::{Args, Subcommand};

/// `engram secrets ...`
#[derive(Debug, Subcommand)]
pub enum SecretsCommand {
    /// Scan existing notes for secrets.
    Scan(ScanArgs),
    /// Manage the salted-hash allowlist.
    #[command(subcommand)]
    Allowlist(AllowlistCommand),
}

/// Arguments for `engram secrets scan`.
#[derive(Debug, Args)]
pub struct ScanArgs {
    /// Restrict to one namespace.
    #[arg(long, short = 'n')]
    pub namespace: Option<String>,

    /// Rewrite notes applying the filter (redact/mask) to findings.
    #[arg(long)]
    pub fix: bool,

    /// With --fix, report without rewriting.
    #[arg(long)]
    pub dry_run: bool,

    /// Domain to scan.
    #[arg(long, default_value = "project")]
    pub domain: String,
}

/// Allowlist operations.
#[derive(Debug, Subcommand)]
pub enum AllowlistCommand {
    /// Approve a detection hash.
    Add {
        /// Salted hash (from a detection audit event or scan output).
        hash: String,
        /// Scope the approval to one namespace.
        #[arg(long, short = 'n')]
        namespace: Option<String>,
        /// Why this value is safe.
        #[arg(long)]
        reason: Option<String>,
    },
    /// Remove an approval.
    Remove {
        /// The hash to remove.
        hash: String,
    },
    /// List approvals.
    List,
}

/// Runs a secrets subcommand.
pub(crate) fn run(container: &Container, command: SecretsCommand) -> Result<i32> {
    match command {
        SecretsCommand::Scan(args) => scan(container, &args),
        SecretsCommand::Allowlist(command) => allowlist(container, command),
    }
}

fn scan(container: &Container, args: &ScanArgs) -> Result<i32> {
    let domain = parse_domain(&args.domain)?;
    let stack = container.stack_for(domain)?;
    let filter = container.secrets();

    let namespaces: Vec<Namespace> = match &args.namespace {
        Some(raw) => vec![parse_namespace(raw)?],
        None => stack.notes.list_namespaces_used()?,
    };

    // Rewrites run under the capture lock like any other note mutation.
    let _guard = if args.fix && !args.dry_run {
        Some(container.capture_lock().acquire()?)
    } else {
        None
    };

    let mut findings = 0usize;
    let mut rewritten = 0usize;

    for namespace in namespaces {
        for (_note_id, commit_id) in stack.notes.list_notes(namespace)? {
            let Some(text) = stack.notes.show_note(namespace, &commit_id)? else {
                continue;
            };
            let records = match NoteCodec::parse_many(&text) {
                Ok(records) => records,
                Err(e) => {
                    println!("skipping unparseable note {namespace}@{commit_id}: {e}");
                    continue;
                },
            };

            let mut changed = false;
            let mut fixed = Vec::with_capacity(records.len());
            for (i, record) in records.into_iter().enumerate() {
                let scan = filter.scan(&record.body, Some(namespace), "scan");
                if scan.had_secrets {
                    findings += scan.detections.len();
                    let id_hint = format!("{namespace}:{}:{i}", &commit_id[..7.min(commit_id.len())]);
                    for detection in &scan.detections {
                        println!(
                            "{id_hint}: {} ({}, confidence {:.2}) hash={}",
                            detection.kind, detection.detector, detection.confidence, detection.hash
                        );
                    }
                    if args.fix {
                        let outcome = filter.filter(&record.body, "scan_fix", Some(namespace));
                        if outcome.content != record.body {
                            let mut record = record;
                            record.body = outcome.content;
                            fixed.push(record);
                            changed = true;
                            continue;
                        }
                    }
                }
                fixed.push(record);
            }

            if changed && !args.dry_run {
                stack
                    .notes
                    .overwrite_note(namespace, &commit_id, &NoteCodec::serialize_many(&fixed))?;
                rewritten += 1;
            }
        }
    }

    println!("{findings} finding(s)");
    if args.fix {
        if args.dry_run {
            println!("dry run: no notes rewritten");
        } else {
            println!("{rewritten} note(s) rewritten; run `engram sync` to refresh the index");
        }
    }
    Ok(0)
}

fn allowlist(container: &Container, command: AllowlistCommand) -> Result<i32> {
    let filter = container.secrets();
    match command {
        AllowlistCommand::Add {
            hash,
            namespace,
            reason,
        } => {
            let namespace = namespace.as_deref().map(parse_namespace).transpose()?;
            if filter.allowlist_add(hash, namespace, reason)? {
                println!("added");
            } else {
                println!("already present");
            }
        },
        AllowlistCommand::Remove { hash } => {
            if filter.allowlist_remove(&hash)? {
                println!("removed");
            } else {
                println!("not present");
            }
        },
        AllowlistCommand::List => {
            let entries = filter.allowlist().entries();
            if entries.is_empty() {
                println!("allowlist is empty");
            }
            for entry in entries {
                println!(
                    "{} scope={} reason={} added={}",
                    entry.hash,
                    entry.namespace.as_deref().unwrap_or("*"),
                    entry.reason.as_deref().unwrap_or("-"),
                    entry.added_at.to_rfc3339()
                );
            }
        },
    }
    Ok(0)
}

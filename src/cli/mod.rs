//! CLI command definitions and dispatch.
//!
//! Exit code contract: `0` success, `1` validation error, `2` blocked by
//! secret, `3` storage error, `4` index inconsistent.

mod audit;
mod capture;
mod recall;
mod secrets;
mod status;
mod sync;

use crate::models::{Domain, MemoryStatus, Namespace, SearchMode};
use crate::services::Container;
use crate::{Error, Result};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

/// Exit code for an inconsistent index (sync verify).
pub const EXIT_INCONSISTENT: i32 = 4;

/// Git-native semantic memory for software-engineering AI agents.
#[derive(Debug, Parser)]
#[command(name = "engram", version, about, max_term_width = 100)]
pub struct Cli {
    /// Repository to operate on (defaults to the current directory).
    #[arg(long, global = true, env = "ENGRAM_REPO")]
    pub repo: Option<String>,

    /// Emit logs as JSON.
    #[arg(long, global = true)]
    pub log_json: bool,

    /// Subcommand to run.
    #[command(subcommand)]
    pub command: Command,
}

/// Top-level subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture a memory attached to a commit.
    Capture(capture::CaptureArgs),
    /// Transition a memory's lifecycle status.
    Transition(capture::TransitionArgs),
    /// Search memories (hybrid by default).
    Recall(recall::RecallArgs),
    /// Keyword-only search (BM25).
    SearchText(recall::SearchTextArgs),
    /// Reconcile the index with the notes.
    Sync(sync::SyncArgs),
    /// Show store and index status.
    Status(status::StatusArgs),
    /// Secrets scanning and allowlist management.
    #[command(subcommand)]
    Secrets(secrets::SecretsCommand),
    /// Query the audit log.
    Audit(audit::AuditArgs),
    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: clap_complete::Shell,
    },
}

/// Runs a parsed command, returning the process exit code.
///
/// # Errors
///
/// Returns the first hard failure; `main` maps it onto the exit code
/// contract.
pub fn run(cli: Cli) -> Result<i32> {
    let command = match cli.command {
        Command::Completions { shell } => {
            let mut command = <Cli as clap::CommandFactory>::command();
            clap_complete::generate(shell, &mut command, "engram", &mut std::io::stdout());
            return Ok(0);
        },
        other => other,
    };

    let repo = cli.repo.unwrap_or_else(|| ".".to_string());
    let config = crate::config::EngramConfig::load(repo)?;
    let container = Container::new(config)?;

    match command {
        Command::Capture(args) => capture::run(&container, args),
        Command::Transition(args) => capture::run_transition(&container, args),
        Command::Recall(args) => recall::run(&container, args),
        Command::SearchText(args) => recall::run_text(&container, args),
        Command::Sync(args) => sync::run(&container, args),
        Command::Status(args) => status::run(&container, args),
        Command::Secrets(command) => secrets::run(&container, command),
        Command::Audit(args) => audit::run(&container, args),
        Command::Completions { .. } => Ok(0),
    }
}

/// Parses a namespace argument against the closed set.
pub(crate) fn parse_namespace(raw: &str) -> Result<Namespace> {
    Namespace::parse(raw).ok_or_else(|| {
        Error::Validation(format!(
            "unknown namespace '{raw}' (expected one of: {})",
            Namespace::all()
                .iter()
                .map(|n| n.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    })
}

/// Parses a domain argument.
pub(crate) fn parse_domain(raw: &str) -> Result<Domain> {
    Domain::parse(raw)
        .ok_or_else(|| Error::Validation(format!("unknown domain '{raw}' (project or user)")))
}

/// Parses a status argument.
pub(crate) fn parse_status(raw: &str) -> Result<MemoryStatus> {
    MemoryStatus::parse(raw).ok_or_else(|| {
        Error::Validation(format!(
            "unknown status '{raw}' (active, resolved, archived, tombstone)"
        ))
    })
}

/// Parses a search mode argument.
pub(crate) fn parse_mode(raw: &str) -> Result<SearchMode> {
    SearchMode::parse(raw)
        .ok_or_else(|| Error::Validation(format!("unknown mode '{raw}' (vector, text, hybrid)")))
}

/// Parses a date argument: RFC 3339, or `YYYY-MM-DD` (midnight UTC).
pub(crate) fn parse_date(raw: &str) -> Result<DateTime<Utc>> {
    if let Ok(instant) = DateTime::parse_from_rfc3339(raw) {
        return Ok(instant.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| Error::Validation(format!("cannot parse date '{raw}'")))
}

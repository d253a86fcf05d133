//! Binary entry point for engram.

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(missing_docs)]
// CLI diagnostics go to stderr.
#![allow(clippy::print_stderr)]

use clap::Parser;
use engram::cli::{Cli, run};

fn main() {
    // .env is optional; ignore absence.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    engram::observability::init(cli.log_json);

    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            eprintln!("error: {e}");
            if let Some(hint) = e.recovery_hint() {
                eprintln!("hint: {hint}");
            }
            std::process::exit(e.exit_code());
        },
    }
}

//! unison-fsmonitor — bridges Unison's fsmonitor protocol to native
//! filesystem watches.
//!
//! The protocol runs over stdin/stdout; diagnostics go to stderr. Any
//! protocol or transport error is fatal and exits non-zero after the
//! `ERROR` reply has been flushed.

use anyhow::{Context, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "unison-fsmonitor",
    version,
    about = "Watch replica roots and report filesystem changes to Unison",
    long_about = None,
)]
struct Cli {
    /// Start with verbose wire logging enabled (same effect as the DEBUG
    /// command).
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    fsmonitor_daemon::start_blocking(cli.debug).context("monitor exited with fatal error")
}

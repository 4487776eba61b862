//! ghx binary entry point.
//!
//! Parses arguments, sets up tracing and dispatches via [`Cli::run`].

mod cli;
mod logging;

use anyhow::Result;
use clap::Parser;

use crate::cli::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let (state_dir, command) = cli.log_context();

    // Best-effort, before tracing is initialized.
    logging::cleanup_old_logs(&state_dir);

    let _guard = logging::init_tracing(&state_dir, command)?;

    cli.run().await
}

//! forgekit - Git Forge Integration Engine CLI
//!
//! A standalone CLI over the forge service layer: projects and forks, pull
//! requests with real merges against bare repositories, and deterministic
//! access-control generation.

use clap::Parser;
use forgekit::cli::Cli;
use forgekit::output::{emit_error, infer_command_name_from_args};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Tracing is opt-in via RUST_LOG; an unset, invalid, or oversized filter
/// leaves logging off so hook and CI invocations never die on startup.
fn init_tracing() {
    let filter = std::env::var("RUST_LOG")
        .ok()
        .map(|raw| raw.trim().to_string())
        .filter(|raw| !raw.is_empty() && raw.len() <= 4096)
        .and_then(|raw| EnvFilter::try_new(raw).ok())
        .unwrap_or_else(|| EnvFilter::new("off"));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn main() {
    init_tracing();

    let command = infer_command_name_from_args();
    let cli = Cli::parse();
    if let Err(err) = cli.run() {
        let _ = emit_error(&command, &err, cli.json);
        std::process::exit(err.exit_code());
    }
}

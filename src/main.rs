//! Atelier CLI entry point.

use clap::Parser;

use atelier::cli::{execute, Cli};
use atelier::infrastructure::config::EngineConfig;
use atelier::infrastructure::logging;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Logging comes up before the engine so config errors are visible too.
    let logging_config = match &cli.config {
        Some(path) => EngineConfig::load_from_file(path)
            .map(|c| c.logging)
            .unwrap_or_default(),
        None => EngineConfig::load().map(|c| c.logging).unwrap_or_default(),
    };
    let _log_guard = match logging::init(&logging_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("warning: logger not initialized: {e}");
            None
        }
    };

    if let Err(err) = execute(cli).await {
        tracing::error!(error = %err, "command failed");
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

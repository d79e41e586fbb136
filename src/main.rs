mod backend;
mod cli;
mod config;
mod error;
mod jobs;
mod logging;
mod model;
mod orchestrator;
mod preferences;
mod refresh;
mod text_summary;
#[cfg(feature = "tui")]
mod tui;

use anyhow::Result;
use clap::Parser;
use logging::LogTarget;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();

    let target = if args.is_tui() {
        LogTarget::File(
            args.log_file
                .clone()
                .unwrap_or_else(logging::default_log_file),
        )
    } else {
        LogTarget::Stderr
    };
    logging::init_logging(&args.log_level, target)?;

    let is_non_tui = !args.is_tui();
    match cli::run(args).await {
        Ok(()) => {
            // Explicitly exit so lingering HTTP tasks don't hold the process open.
            if is_non_tui {
                std::process::exit(0);
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "job monitor failed");
            Err(e)
        }
    }
}

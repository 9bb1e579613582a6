use anyhow::{Result, anyhow};
use clap::Parser;

use workspace_watch::cli::commands::{init, list, watch};
use workspace_watch::cli::{Cli, Commands};
use workspace_watch::{Settings, logging};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match &cli.config {
        Some(path) => Settings::load_from(path),
        None => Settings::load(),
    }
    .map_err(|e| anyhow!("Failed to load configuration: {e}"))?;

    logging::init_with_config(&settings.logging);

    match cli.command {
        Commands::Init { force } => init::run_init(force),
        Commands::Config => init::run_config(&settings),
        Commands::List { path, json } => list::run(&path, json, &settings),
        Commands::Watch {
            bindings,
            debounce_ms,
            poll_interval_ms,
            list,
        } => {
            let args = watch::WatchArgs {
                bindings,
                debounce_ms,
                poll_interval_ms,
                list,
            };
            watch::run(args, &settings).await
        }
    }
}

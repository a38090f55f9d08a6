//! Cadence CLI entry point.
//!
//! Binary name: `cadence`
//!
//! Loads `cadence.toml` (if given), initializes tracing, then dispatches to
//! the requested subcommand.

mod cli;
mod config;

use clap::Parser;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut app_config = config::load(cli.config.as_deref())?;
    match cli.verbose {
        0 => {}
        1 => app_config.logging.filter = "info,cadence_core=debug".to_string(),
        _ => app_config.logging.filter = "trace".to_string(),
    }
    cadence_observe::tracing_setup::init_tracing(&app_config.logging)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = match cli.command {
        Commands::Validate { file } => cli::workflow::validate(&file, cli.json),
        Commands::List { dir } => cli::workflow::list(&dir, cli.json),
        Commands::Run {
            file,
            vars,
            triggered_by,
            approve,
            reject,
        } => {
            let decision = match (approve, reject) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let options = cli::workflow::RunOptions {
                vars,
                triggered_by,
                decision,
                json: cli.json,
            };
            cli::workflow::run(&file, &app_config, options).await
        }
    };

    cadence_observe::tracing_setup::shutdown_tracing();
    result
}

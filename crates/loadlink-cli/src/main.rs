use std::io;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;
mod format;

use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Some(Commands::Completions { shell }) = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "loadlink", &mut io::stdout());
        return Ok(());
    }

    // Logs go to stderr so stdout stays a clean stream of samples.
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("loadlink=info,loadlink_core=info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Some(Commands::Run(args)) => commands::cmd_run(args).await,
        Some(Commands::Scan {
            timeout,
            target,
            format,
        }) => commands::cmd_scan(timeout, target.to_config(), format, cli.quiet).await,
        Some(Commands::Completions { .. }) => unreachable!("handled above"),
        None => commands::cmd_run(cli.run).await,
    }
}

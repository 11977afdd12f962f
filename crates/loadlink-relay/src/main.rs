//! Loadlink Relay - WebSocket relay and InfluxDB writer.
//!
//! Run with: `cargo run -p loadlink-relay`

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use loadlink_relay::config::default_config_path;
use loadlink_relay::{AppState, Config, InfluxSink, PersistenceSink, api};

/// Loadlink Relay - WebSocket relay between devices, browsers and InfluxDB.
#[derive(Parser, Debug)]
#[command(name = "loadlink-relay")]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to configuration file.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bind address (overrides config).
    #[arg(short, long, global = true)]
    bind: Option<String>,

    /// InfluxDB API token (overrides config).
    #[arg(long, env = "LOADLINK_INFLUX_TOKEN", hide_env_values = true, global = true)]
    influx_token: Option<String>,

    /// Do not write samples to InfluxDB.
    #[arg(long, global = true)]
    no_sink: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the relay in the foreground (default behavior).
    Run,

    /// Write a default configuration file.
    InitConfig {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::InitConfig { force }) => init_config(args.config, force),
        Some(Command::Run) | None => run_server(args).await,
    }
}

fn init_config(path: Option<PathBuf>, force: bool) -> anyhow::Result<()> {
    let path = path.unwrap_or_else(default_config_path);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    Config::default().save(&path)?;
    println!("Wrote {}", path.display());
    Ok(())
}

async fn run_server(args: Args) -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("loadlink_relay=info".parse()?)
                .add_directive("tower_http=debug".parse()?),
        )
        .init();

    // Load configuration
    let mut config = match &args.config {
        Some(path) => Config::load(path)?,
        None => Config::load_default()?,
    };

    // Override config with CLI args
    if let Some(bind) = args.bind {
        config.server.bind = bind;
    }
    if let Some(token) = args.influx_token {
        config.sink.token = Some(token);
    }
    if args.no_sink {
        config.sink.enabled = false;
    }
    config.validate()?;

    let sink: Option<Arc<dyn PersistenceSink>> = if config.sink.enabled {
        if config.sink.token.is_none() {
            warn!("No InfluxDB token configured, writes will likely be rejected");
        }
        info!(
            "Writing samples to {} (org {}, bucket {})",
            config.sink.url, config.sink.org, config.sink.bucket
        );
        let influx: Arc<dyn PersistenceSink> = Arc::new(InfluxSink::new(&config.sink)?);
        Some(influx)
    } else {
        info!("Persistence sink disabled");
        None
    };

    let bind = config.server.bind.clone();
    let app = api::app(AppState::new(config, sink));

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Relay listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl+C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}

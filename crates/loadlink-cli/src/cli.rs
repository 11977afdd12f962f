//! CLI argument definitions using clap.

use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};
use uuid::Uuid;

use loadlink_core::{RetryPolicy, TargetConfig};
use loadlink_types::uuids::{DEFAULT_DEVICE_NAME, SAMPLE_CHARACTERISTIC, SENSOR_SERVICE};

/// Output format for events printed to stdout
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "loadlink")]
#[command(author, version, about = "BLE data logger for the loadlink load-cell sensor", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress non-essential output
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Options for the default `run` command
    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Connect to the sensor and log samples until interrupted (default)
    Run(RunArgs),

    /// List nearby BLE peripherals
    Scan {
        /// Scan duration in seconds
        #[arg(short, long, default_value = "10")]
        timeout: u64,

        #[command(flatten)]
        target: TargetArgs,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

/// Which peripheral to look for
#[derive(Debug, Clone, Args)]
pub struct TargetArgs {
    /// Advertised name of the sensor
    #[arg(short = 'n', long = "name", env = "LOADLINK_DEVICE_NAME", default_value = DEFAULT_DEVICE_NAME)]
    pub name: String,

    /// GATT service carrying the samples
    #[arg(long, env = "LOADLINK_SERVICE_UUID", default_value_t = SENSOR_SERVICE)]
    pub service: Uuid,

    /// Notify characteristic carrying the samples
    #[arg(long, env = "LOADLINK_CHARACTERISTIC_UUID", default_value_t = SAMPLE_CHARACTERISTIC)]
    pub characteristic: Uuid,

    /// Also accept a peripheral advertising the service, whatever its name
    #[arg(long)]
    pub match_service: bool,
}

impl TargetArgs {
    /// Target configuration for the connection manager.
    pub fn to_config(&self) -> TargetConfig {
        TargetConfig::new(self.name.clone())
            .service(self.service)
            .characteristic(self.characteristic)
            .match_service(self.match_service)
    }
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Seconds to wait before scanning again after a failure
    #[arg(long, env = "LOADLINK_RETRY_DELAY", default_value = "10")]
    pub retry_delay: u64,

    /// Connection timeout in seconds
    #[arg(short = 'T', long, default_value = "15")]
    pub timeout: u64,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl RunArgs {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from_secs(self.retry_delay)
    }

    pub fn connection_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["loadlink"]).unwrap();
        assert!(cli.command.is_none());
        let target = cli.run.target.to_config();
        assert_eq!(target.name, DEFAULT_DEVICE_NAME);
        assert_eq!(target.service, SENSOR_SERVICE);
        assert_eq!(target.characteristic, SAMPLE_CHARACTERISTIC);
        assert!(!target.match_service);
        assert_eq!(cli.run.retry_policy().delay(), Duration::from_secs(10));
        assert_eq!(cli.run.format, OutputFormat::Text);
    }

    #[test]
    fn test_run_overrides() {
        let cli = Cli::try_parse_from([
            "loadlink",
            "run",
            "--name",
            "Bench",
            "--service",
            "0000180d-0000-1000-8000-00805f9b34fb",
            "--match-service",
            "--retry-delay",
            "3",
            "--format",
            "json",
        ])
        .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        let target = args.target.to_config();
        assert_eq!(target.name, "Bench");
        assert_eq!(
            target.service.to_string(),
            "0000180d-0000-1000-8000-00805f9b34fb"
        );
        assert!(target.match_service);
        assert_eq!(args.retry_policy().delay(), Duration::from_secs(3));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_invalid_uuid_rejected() {
        let result = Cli::try_parse_from(["loadlink", "run", "--service", "not-a-uuid"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_scan_args() {
        let cli = Cli::try_parse_from(["loadlink", "scan", "-t", "5"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Commands::Scan { timeout: 5, .. })
        ));
    }
}

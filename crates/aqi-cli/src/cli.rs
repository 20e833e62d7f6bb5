//! CLI argument definitions using clap.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Output format for commands
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Parser)]
#[command(name = "aqi", version, about = "Live air-quality readings from a remote sensor")]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true, env = "NO_COLOR", value_parser = clap::builder::BoolishValueParser::new())]
    pub no_color: bool,

    /// Settings file (defaults to the platform config directory)
    #[arg(long, global = true, env = "AQI_SETTINGS")]
    pub settings: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Subscribe to a sensor's MQTT topic and print every reading
    Watch(WatchArgs),

    /// Poll a sensor over HTTP and print every reading
    Poll(PollArgs),

    /// Show or change the saved connection settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },
}

/// Reusable output arguments
#[derive(Debug, Clone, Args)]
pub struct OutputArgs {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: OutputFormat,

    /// Exit after this many readings (0 = run until interrupted)
    #[arg(short = 'n', long, default_value = "0")]
    pub count: u64,
}

#[derive(Debug, Clone, Args)]
pub struct WatchArgs {
    /// Broker host (overrides saved settings)
    #[arg(short, long)]
    pub broker: Option<String>,

    /// Broker websocket port (overrides saved settings)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Topic to subscribe to (overrides saved settings)
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Seconds to wait for the broker before giving up on a connection attempt
    #[arg(long, default_value = "10")]
    pub connect_timeout: u64,

    /// Keep the last reading when the connection drops
    #[arg(long)]
    pub keep_stale: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Args)]
pub struct PollArgs {
    /// Sensor host or URL, e.g. `192.168.1.40` or `https://sensor.local`
    pub endpoint: String,

    /// Sensor port
    #[arg(short, long)]
    pub port: Option<String>,

    /// Request path
    #[arg(long, default_value = "/aqi")]
    pub path: String,

    /// Seconds between requests
    #[arg(short, long, default_value = "5")]
    pub interval: u64,

    /// Seconds before a request is abandoned
    #[arg(short = 'T', long, default_value = "10")]
    pub timeout: u64,

    /// Clear the last reading when a request fails
    #[arg(long)]
    pub clear_stale: bool,

    #[command(flatten)]
    pub output: OutputArgs,
}

#[derive(Debug, Clone, Subcommand)]
pub enum SettingsAction {
    /// Print the saved settings
    Show {
        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change one setting (broker, port or topic)
    Set {
        /// Setting name
        field: String,
        /// New value
        value: String,
    },

    /// Restore the default broker, port and topic
    Reset,

    /// Print the settings file location
    Path,
}

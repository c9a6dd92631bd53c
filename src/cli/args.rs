use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::core::communication::SettlementOutcome;
use crate::domain::config::ProtocolKind;

/// Command line arguments for HubLink
#[derive(Parser, Debug)]
#[command(
    name = "hublink",
    version = env!("CARGO_PKG_VERSION"),
    about = "Device-side messaging client for a cloud telemetry hub",
    long_about = "Sends telemetry events to a cloud hub and receives cloud-to-device commands \
        over HTTPS polling or a persistent MQTT link."
)]
pub struct Args {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    pub config: Option<String>,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send telemetry events
    Send(SendArgs),
    /// Receive and settle cloud-to-device messages
    Receive(ReceiveArgs),
    /// Configuration management commands
    Config(ConfigArgs),
    /// Display version information
    Version,
}

/// Output format options
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Table output
    Table,
}

/// Where to connect; flags override the selected device profile
#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// Device profile name from the configuration
    #[arg(short, long)]
    pub device: Option<String>,

    /// Wire protocol
    #[arg(long, value_enum)]
    pub protocol: Option<ProtocolArg>,

    /// Hub host name
    #[arg(long)]
    pub host: Option<String>,

    /// Device identifier
    #[arg(long)]
    pub device_id: Option<String>,

    /// Pre-signed credential
    #[arg(long)]
    pub credential: Option<String>,

    /// Gateway host for the persistent link, e.g. mqtts://gw:8883
    #[arg(long)]
    pub gateway: Option<String>,
}

/// Send arguments
#[derive(ClapArgs, Debug)]
pub struct SendArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Number of events to send
    #[arg(short = 'n', long, default_value = "1")]
    pub count: u32,

    /// Payload; a fresh UUID per event when omitted
    #[arg(long)]
    pub data: Option<String>,

    /// Payload format
    #[arg(short, long, value_enum, default_value = "text")]
    pub format: DataFormat,

    /// Message property as key=value (repeatable)
    #[arg(short, long = "property", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Send all events in one batch request
    #[arg(short, long)]
    pub batch: bool,
}

/// Receive arguments
#[derive(ClapArgs, Debug)]
pub struct ReceiveArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Per-poll timeout in milliseconds (defaults to the configured value)
    #[arg(short, long)]
    pub timeout_ms: Option<u64>,

    /// Stop after this many messages
    #[arg(short, long, default_value = "1")]
    pub max: u32,

    /// Stop after this many consecutive empty polls
    #[arg(short, long, default_value = "3")]
    pub idle: u32,

    /// How to settle every received message
    #[arg(short, long, value_enum, default_value = "complete")]
    pub settle: SettleArg,
}

/// Configuration management arguments
#[derive(ClapArgs, Debug)]
pub struct ConfigArgs {
    /// Configuration subcommand
    #[command(subcommand)]
    pub command: ConfigCommand,
}

/// Configuration management subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Show current configuration
    Show,
    /// List device profiles
    Devices,
    /// Create a project configuration with example profiles
    Init {
        /// Directory to create `.hublink/config.toml` in
        #[arg(short, long)]
        path: Option<String>,
    },
}

/// Protocol argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolArg {
    Http,
    Mqtt,
}

/// Data format argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    Text,
    Hex,
    Base64,
}

/// Settlement argument
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettleArg {
    Complete,
    Reject,
    Abandon,
}

impl From<ProtocolArg> for ProtocolKind {
    fn from(protocol: ProtocolArg) -> Self {
        match protocol {
            ProtocolArg::Http => Self::Http,
            ProtocolArg::Mqtt => Self::Mqtt,
        }
    }
}

impl From<SettleArg> for SettlementOutcome {
    fn from(settle: SettleArg) -> Self {
        match settle {
            SettleArg::Complete => Self::Completed,
            SettleArg::Reject => Self::Rejected,
            SettleArg::Abandon => Self::Abandoned,
        }
    }
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected key=value, got '{}'", raw)),
    }
}

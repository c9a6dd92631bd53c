use serde::Serialize;
use std::io;
use tabled::{Table, Tabled};

use crate::cli::args::OutputFormat;
use crate::core::communication::{Message, PropertyBag, SettlementOutcome};
use crate::domain::config::{DeviceProfile, HubConfig};

/// Output writer trait for different formats
pub trait OutputWriter {
    fn write_config(&self, config: &HubConfig) -> Result<(), OutputError>;
    fn write_devices(&self, devices: &[DeviceProfile]) -> Result<(), OutputError>;
    fn write_send_report(&self, report: &SendReport) -> Result<(), OutputError>;
    fn write_received(&self, record: &ReceivedRecord) -> Result<(), OutputError>;
    fn write_message(&self, message: &str) -> Result<(), OutputError>;
    fn write_error(&self, error: &str) -> Result<(), OutputError>;
}

/// Output formatting errors
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),
}

impl From<OutputError> for crate::domain::error::HubError {
    fn from(err: OutputError) -> Self {
        Self::Output(err.to_string())
    }
}

/// Outcome of a `send` run
#[derive(Debug, Clone, Serialize)]
pub struct SendReport {
    pub protocol: String,
    pub device_id: String,
    pub events: usize,
    pub bytes: usize,
    pub batch: bool,
}

/// One received message as shown to the user
#[derive(Debug, Clone, Serialize)]
pub struct ReceivedRecord {
    pub token: String,
    pub body: String,
    /// `text` when the payload is valid UTF-8, otherwise `hex`
    pub encoding: &'static str,
    pub properties: PropertyBag,
    pub settlement: String,
}

impl ReceivedRecord {
    pub fn new(message: &Message, outcome: SettlementOutcome) -> Self {
        let (body, encoding) = match message.data_as_string() {
            Some(text) => (text, "text"),
            None => (message.data_as_hex(), "hex"),
        };

        Self {
            token: message
                .delivery_token()
                .map(ToString::to_string)
                .unwrap_or_default(),
            body,
            encoding,
            properties: message.properties().clone(),
            settlement: outcome.to_string(),
        }
    }

    fn properties_line(&self) -> String {
        self.properties
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Copy of the configuration safe to print
fn redacted(config: &HubConfig) -> HubConfig {
    let mut config = config.clone();
    for device in &mut config.devices {
        redact_device(device);
    }
    config
}

fn redact_device(device: &mut DeviceProfile) {
    if !device.connection.credential.is_empty() {
        device.connection.credential = "********".to_string();
    }
}

/// Console output writer
pub struct ConsoleWriter {
    format: OutputFormat,
    quiet: bool,
}

impl ConsoleWriter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format, quiet: false }
    }

    /// Suppress informational text; errors and requested data still print
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }
}

impl OutputWriter for ConsoleWriter {
    fn write_config(&self, config: &HubConfig) -> Result<(), OutputError> {
        let config = redacted(config);
        match self.format {
            OutputFormat::Text => {
                println!("HubLink Configuration:");
                println!("  Log level: {}", config.global.log_level);
                println!("  Poll timeout: {}ms", config.global.poll_timeout_ms);
                println!("  Request timeout: {}ms", config.global.request_timeout_ms);
                println!("  API version: {}", config.global.api_version);

                if !config.devices.is_empty() {
                    println!("  Devices:");
                    for device in &config.devices {
                        let desc = if device.description.is_empty() {
                            "No description"
                        } else {
                            &device.description
                        };
                        println!("    {} ({}): {}", device.name, device.protocol, desc);
                    }
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&config)?);
            }
            OutputFormat::Table => {
                if !config.devices.is_empty() {
                    let rows: Vec<DeviceTableRow> =
                        config.devices.iter().map(DeviceTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_devices(&self, devices: &[DeviceProfile]) -> Result<(), OutputError> {
        let mut devices = devices.to_vec();
        devices.iter_mut().for_each(redact_device);

        match self.format {
            OutputFormat::Text => {
                for device in &devices {
                    println!("Device: {}", device.name);
                    let desc = if device.description.is_empty() {
                        "No description"
                    } else {
                        &device.description
                    };
                    println!("  Description: {}", desc);
                    println!("  Protocol: {}", device.protocol);
                    println!("  Hub: {}", device.connection.host);
                    println!("  Device id: {}", device.connection.device_id);
                    if let Some(gateway) = &device.connection.gateway_host {
                        println!("  Gateway: {}", gateway);
                    }
                    println!();
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(&devices)?);
            }
            OutputFormat::Table => {
                if !devices.is_empty() {
                    let rows: Vec<DeviceTableRow> =
                        devices.iter().map(DeviceTableRow::from).collect();
                    println!("{}", Table::new(rows));
                }
            }
        }
        Ok(())
    }

    fn write_send_report(&self, report: &SendReport) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                if !self.quiet {
                    let mode = if report.batch { " in one batch" } else { "" };
                    println!(
                        "Sent {} event(s), {} bytes, to '{}' over {}{}",
                        report.events, report.bytes, report.device_id, report.protocol, mode
                    );
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string_pretty(report)?);
            }
            OutputFormat::Table => {
                println!("{}", Table::new(vec![SendTableRow::from(report)]));
            }
        }
        Ok(())
    }

    fn write_received(&self, record: &ReceivedRecord) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Text => {
                println!("Message {} ({})", record.token, record.settlement);
                println!("  Body ({}): {}", record.encoding, record.body);
                if !record.properties.is_empty() {
                    println!("  Properties: {}", record.properties_line());
                }
            }
            OutputFormat::Json => {
                println!("{}", serde_json::to_string(record)?);
            }
            OutputFormat::Table => {
                println!("{}", Table::new(vec![ReceivedTableRow::from(record)]));
            }
        }
        Ok(())
    }

    fn write_message(&self, message: &str) -> Result<(), OutputError> {
        if self.quiet {
            return Ok(());
        }
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "message": message,
                    "level": "info"
                });
                println!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                println!("{}", message);
            }
        }
        Ok(())
    }

    fn write_error(&self, error: &str) -> Result<(), OutputError> {
        match self.format {
            OutputFormat::Json => {
                let output = serde_json::json!({
                    "error": error,
                    "level": "error"
                });
                eprintln!("{}", serde_json::to_string_pretty(&output)?);
            }
            _ => {
                eprintln!("Error: {}", error);
            }
        }
        Ok(())
    }
}

/// Table row for device profiles
#[derive(Tabled)]
struct DeviceTableRow {
    name: String,
    protocol: String,
    host: String,
    device_id: String,
    description: String,
}

impl From<&DeviceProfile> for DeviceTableRow {
    fn from(device: &DeviceProfile) -> Self {
        Self {
            name: device.name.clone(),
            protocol: device.protocol.to_string(),
            host: device.connection.host.clone(),
            device_id: device.connection.device_id.clone(),
            description: device.description.clone(),
        }
    }
}

/// Table row for a send run
#[derive(Tabled)]
struct SendTableRow {
    device: String,
    protocol: String,
    events: usize,
    bytes: usize,
    batch: bool,
}

impl From<&SendReport> for SendTableRow {
    fn from(report: &SendReport) -> Self {
        Self {
            device: report.device_id.clone(),
            protocol: report.protocol.clone(),
            events: report.events,
            bytes: report.bytes,
            batch: report.batch,
        }
    }
}

/// Table row for a received message
#[derive(Tabled)]
struct ReceivedTableRow {
    token: String,
    body: String,
    properties: String,
    settlement: String,
}

impl From<&ReceivedRecord> for ReceivedTableRow {
    fn from(record: &ReceivedRecord) -> Self {
        Self {
            token: record.token.clone(),
            body: record.body.clone(),
            properties: record.properties_line(),
            settlement: record.settlement.clone(),
        }
    }
}

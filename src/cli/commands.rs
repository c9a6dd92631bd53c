use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cli::args::{
    Args, Command, ConfigArgs, ConfigCommand, ConnectionArgs, DataFormat, ReceiveArgs, SendArgs,
};
use crate::cli::output::{ConsoleWriter, OutputWriter, ReceivedRecord, SendReport};
use crate::core::communication::{HubTransport, Message, PropertyBag, SettlementOutcome};
use crate::domain::config::{DeviceProfile, GlobalConfig, HubConfig};
use crate::domain::error::{HubError, HubResult};
use crate::infrastructure::config::ConfigManager;
use crate::infrastructure::logging::init_logging;

/// Execute CLI command
pub async fn execute_command(args: Args) -> HubResult<()> {
    let writer = ConsoleWriter::new(args.output).quiet(args.quiet);

    let config = match &args.config {
        Some(config_path) => ConfigManager::load_config_from_path(Path::new(config_path))?,
        None => ConfigManager::new()?.load_config()?,
    };

    if !args.quiet {
        setup_logging(&config.global, args.verbose)?;
    }

    match args.command {
        Command::Send(send_args) => execute_send(send_args, &writer, &config).await,
        Command::Receive(receive_args) => execute_receive(receive_args, &writer, &config).await,
        Command::Config(config_args) => execute_config_command(config_args, &writer, &config),
        Command::Version => {
            writer.write_message(&format!("hublink {}", env!("CARGO_PKG_VERSION")))?;
            Ok(())
        }
    }
}

/// Merge the named profile with flag overrides
pub fn resolve_profile(args: &ConnectionArgs, config: &HubConfig) -> HubResult<DeviceProfile> {
    let mut profile = match &args.device {
        Some(name) => config.find_device(name).cloned().ok_or_else(|| HubError::Config {
            message: format!("Unknown device profile '{}'", name),
        })?,
        None => DeviceProfile {
            name: "command-line".to_string(),
            description: String::new(),
            protocol: Default::default(),
            connection: Default::default(),
            qos: Default::default(),
            keep_alive_secs: 60,
        },
    };

    if let Some(protocol) = args.protocol {
        profile.protocol = protocol.into();
    }
    if let Some(host) = &args.host {
        profile.connection.host = host.clone();
    }
    if let Some(device_id) = &args.device_id {
        profile.connection.device_id = device_id.clone();
    }
    if let Some(credential) = &args.credential {
        profile.connection.credential = credential.clone();
    }
    if let Some(gateway) = &args.gateway {
        profile.connection.gateway_host = Some(gateway.clone());
    }

    Ok(profile)
}

async fn execute_send(args: SendArgs, writer: &ConsoleWriter, config: &HubConfig) -> HubResult<()> {
    let profile = resolve_profile(&args.connection, config)?;
    let transport = HubTransport::from_profile(&profile, &config.global)?;
    let messages = build_messages(&args)?;

    transport.connect().await?;
    let result = send_all(&transport, &messages, args.batch).await;
    transport.disconnect().await;
    result?;

    writer.write_send_report(&SendReport {
        protocol: transport.protocol().to_string(),
        device_id: profile.connection.device_id.clone(),
        events: messages.len(),
        bytes: messages.iter().map(|message| message.payload().len()).sum(),
        batch: args.batch,
    })?;
    Ok(())
}

async fn send_all(transport: &HubTransport, messages: &[Message], batch: bool) -> HubResult<()> {
    if batch {
        return transport.send_event_batch(messages).await;
    }
    for (index, message) in messages.iter().enumerate() {
        transport.send_event(message.clone()).await?;
        debug!("Sent event {}/{}", index + 1, messages.len());
    }
    Ok(())
}

/// One message per `--count`; each gets a fresh UUID when no payload is given
pub fn build_messages(args: &SendArgs) -> HubResult<Vec<Message>> {
    if args.count == 0 {
        return Err(HubError::InvalidArgument("--count must be at least 1".to_string()));
    }

    let payload = args
        .data
        .as_deref()
        .map(|data| parse_data(data, args.format))
        .transpose()?;

    let mut properties = PropertyBag::new();
    for (key, value) in &args.properties {
        properties.insert(key.clone(), value.clone())?;
    }

    Ok((0..args.count)
        .map(|_| {
            let payload = payload
                .clone()
                .unwrap_or_else(|| Uuid::new_v4().to_string().into_bytes());
            Message::with_properties(payload, properties.clone())
        })
        .collect())
}

async fn execute_receive(
    args: ReceiveArgs,
    writer: &ConsoleWriter,
    config: &HubConfig,
) -> HubResult<()> {
    let profile = resolve_profile(&args.connection, config)?;
    let transport = HubTransport::from_profile(&profile, &config.global)?;
    let timeout = Duration::from_millis(args.timeout_ms.unwrap_or(config.global.poll_timeout_ms));

    transport.connect().await?;
    let result = receive_loop(&transport, &args, timeout, writer).await;
    transport.disconnect().await;
    let received = result?;

    if received == 0 {
        writer.write_message("No messages received")?;
    }
    Ok(())
}

async fn receive_loop(
    transport: &HubTransport,
    args: &ReceiveArgs,
    timeout: Duration,
    writer: &ConsoleWriter,
) -> HubResult<u32> {
    let receiver = transport.get_receiver().await?;
    let outcome = SettlementOutcome::from(args.settle);
    let idle_limit = args.idle.max(1);
    let mut received = 0;
    let mut idle = 0;

    while received < args.max && idle < idle_limit {
        match receiver.receive(timeout).await? {
            Some(message) => {
                idle = 0;
                received += 1;
                receiver.settle(&message, outcome).await?;
                writer.write_received(&ReceivedRecord::new(&message, outcome))?;
            }
            None => {
                idle += 1;
                debug!("No message within {:?} ({}/{})", timeout, idle, idle_limit);
            }
        }
    }

    info!("Received {} message(s)", received);
    Ok(received)
}

fn execute_config_command(
    args: ConfigArgs,
    writer: &ConsoleWriter,
    config: &HubConfig,
) -> HubResult<()> {
    match args.command {
        ConfigCommand::Show => {
            writer.write_config(config)?;
            Ok(())
        }
        ConfigCommand::Devices => {
            writer.write_devices(&config.devices)?;
            Ok(())
        }
        ConfigCommand::Init { path } => {
            let base = match path {
                Some(path) => PathBuf::from(path),
                None => std::env::current_dir().map_err(|e| HubError::Config {
                    message: format!("Failed to get current directory: {}", e),
                })?,
            };
            let config_file = ConfigManager::init_project_config(&base)?;
            writer.write_message(&format!(
                "Project configuration initialized at '{}'",
                config_file.display()
            ))?;
            Ok(())
        }
    }
}

pub fn parse_data(data: &str, format: DataFormat) -> HubResult<Vec<u8>> {
    match format {
        DataFormat::Text => Ok(data.as_bytes().to_vec()),
        DataFormat::Hex => {
            let cleaned = data.replace([' ', '\n'], "");
            hex::decode(&cleaned)
                .map_err(|e| HubError::InvalidArgument(format!("Invalid hex data: {}", e)))
        }
        DataFormat::Base64 => {
            use base64::Engine;
            base64::engine::general_purpose::STANDARD
                .decode(data)
                .map_err(|e| HubError::InvalidArgument(format!("Invalid base64 data: {}", e)))
        }
    }
}

fn setup_logging(global: &GlobalConfig, verbose: bool) -> HubResult<()> {
    init_logging(&global.log_level, verbose)
}

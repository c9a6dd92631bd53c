// HubLink - Device messaging client for a cloud telemetry hub
use clap::Parser;
use hublink::cli::{execute_command, Args};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    execute_command(args).await?;
    Ok(())
}

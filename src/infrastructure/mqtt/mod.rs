// MQTT module - Persistent-link protocol implementation
pub mod ack;
pub mod client;
pub mod engine;
pub mod topic;

pub use client::MqttConnector;
pub use engine::{LinkSettings, PersistentLinkEngine};

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::domain::config::QualityOfService;
use crate::domain::error::{ConnectionError, HubError, HubResult};

/// Default secure MQTT port
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Default plain MQTT port
pub const DEFAULT_PLAIN_PORT: u16 = 1883;

/// Everything needed to open one physical link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkOptions {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub client_id: String,
    pub username: String,
    pub password: String,
    pub clean_session: bool,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

/// Unsolicited traffic reported by an open link
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Publish { topic: String, payload: Vec<u8> },
    /// The link dropped; it is not re-established
    Lost(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct LinkError(pub String);

/// Opens physical links
#[async_trait]
pub trait LinkConnector: Send + Sync {
    /// Resolve once the broker accepted the connection
    async fn open(
        &self,
        options: &LinkOptions,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn LinkSession>, ConnectionError>;
}

/// One open link
#[async_trait]
pub trait LinkSession: Send + Sync {
    /// Resolve when the broker acknowledged (QoS 1) or once queued (QoS 0)
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityOfService,
    ) -> Result<(), LinkError>;

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<(), LinkError>;

    async fn close(&self) -> Result<(), LinkError>;
}

/// Gateway address in `[scheme://]host[:port]` form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayAddress {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
}

impl GatewayAddress {
    pub fn parse(gateway: &str) -> HubResult<Self> {
        let gateway = gateway.trim();
        let (scheme, rest) = match gateway.split_once("://") {
            Some((scheme, rest)) => (Some(scheme.to_ascii_lowercase()), rest),
            None => (None, gateway),
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    HubError::InvalidArgument(format!("invalid gateway port in '{}'", gateway))
                })?;
                (host.to_string(), Some(port))
            }
            None => (rest.to_string(), None),
        };

        if host.is_empty() {
            return Err(HubError::InvalidArgument(format!("invalid gateway host '{}'", gateway)));
        }

        let use_tls = match scheme.as_deref() {
            Some("mqtts") | Some("ssl") | Some("tls") => true,
            Some("mqtt") | Some("tcp") => false,
            Some(other) => {
                return Err(HubError::InvalidArgument(format!(
                    "unsupported gateway scheme '{}'",
                    other
                )))
            }
            None => port.map_or(true, |port| port != DEFAULT_PLAIN_PORT),
        };
        let port = port.unwrap_or(if use_tls { DEFAULT_TLS_PORT } else { DEFAULT_PLAIN_PORT });

        Ok(Self { host, port, use_tls })
    }
}

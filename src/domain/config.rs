use serde::{Deserialize, Serialize};

use crate::core::communication::settlement::SettlementOutcome;
use crate::domain::error::{HubError, HubResult};

/// HubLink configuration file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Global configuration
    #[serde(default)]
    pub global: GlobalConfig,
    /// Device profiles
    #[serde(default)]
    pub devices: Vec<DeviceProfile>,
}

/// Global configuration settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Default log level
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Receive poll timeout in milliseconds
    #[serde(default = "default_poll_timeout")]
    pub poll_timeout_ms: u64,
    /// Per-request timeout for the polling protocol in milliseconds
    #[serde(default = "default_request_timeout")]
    pub request_timeout_ms: u64,
    /// Service API version sent with every polling request
    #[serde(default = "default_api_version")]
    pub api_version: String,
}

/// Named device profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceProfile {
    /// Profile name
    pub name: String,
    /// Profile description
    #[serde(default)]
    pub description: String,
    /// Wire protocol
    #[serde(default)]
    pub protocol: ProtocolKind,
    /// Connection material
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Quality of service for persistent-link publishes
    #[serde(default)]
    pub qos: QualityOfService,
    /// Keep-alive interval for the persistent link in seconds
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,
}

/// Connection material handed to the transport fully formed.
///
/// Every field defaults to empty so a missing entry is reported by
/// [`ConnectionConfig::validate`] rather than by the deserializer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Hub host name
    #[serde(default)]
    pub host: String,
    /// Device identifier
    #[serde(default)]
    pub device_id: String,
    /// Pre-signed, time-bounded credential
    #[serde(default)]
    pub credential: String,
    /// Gateway host, required by the persistent-link protocol
    #[serde(default)]
    pub gateway_host: Option<String>,
}

impl ConnectionConfig {
    pub fn new(
        host: impl Into<String>,
        device_id: impl Into<String>,
        credential: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            device_id: device_id.into(),
            credential: credential.into(),
            gateway_host: None,
        }
    }

    pub fn with_gateway_host(mut self, gateway_host: impl Into<String>) -> Self {
        self.gateway_host = Some(gateway_host.into());
        self
    }

    /// Check that every field the protocol needs is present and non-empty.
    ///
    /// All missing fields are reported at once.
    pub fn validate(&self, protocol: ProtocolKind) -> HubResult<()> {
        let mut missing = Vec::new();

        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.device_id.trim().is_empty() {
            missing.push("device_id");
        }
        if self.credential.trim().is_empty() {
            missing.push("credential");
        }
        if protocol.requires_gateway() {
            let gateway_missing = self
                .gateway_host
                .as_deref()
                .map_or(true, |gateway| gateway.trim().is_empty());
            if gateway_missing {
                missing.push("gateway_host");
            }
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(HubError::missing_fields(missing))
        }
    }
}

/// The closed set of wire protocols
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    /// Request/response polling (HTTP)
    #[default]
    Http,
    /// Persistent publish/subscribe link (MQTT)
    Mqtt,
}

impl ProtocolKind {
    pub fn requires_gateway(&self) -> bool {
        matches!(self, ProtocolKind::Mqtt)
    }

    pub fn supports_batch(&self) -> bool {
        matches!(self, ProtocolKind::Http)
    }

    /// Whether settling with `outcome` sends anything to the hub.
    ///
    /// The persistent link has no per-message acknowledgment at its
    /// minimal QoS, so its settlements are local bookkeeping only.
    pub fn settlement_has_wire_effect(&self, _outcome: SettlementOutcome) -> bool {
        matches!(self, ProtocolKind::Http)
    }
}

impl std::fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolKind::Http => write!(f, "http"),
            ProtocolKind::Mqtt => write!(f, "mqtt"),
        }
    }
}

impl std::str::FromStr for ProtocolKind {
    type Err = HubError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(ProtocolKind::Http),
            "mqtt" | "mqtts" => Ok(ProtocolKind::Mqtt),
            other => Err(HubError::InvalidArgument(format!("unknown protocol '{}'", other))),
        }
    }
}

/// Delivery guarantee for persistent-link publishes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityOfService {
    /// Fire-and-forget
    #[default]
    AtMostOnce,
    /// Broker acknowledgment required
    AtLeastOnce,
}

// Default value functions
fn default_log_level() -> String {
    "info".to_string()
}

fn default_poll_timeout() -> u64 {
    1000
}

fn default_request_timeout() -> u64 {
    30_000
}

fn default_api_version() -> String {
    "2016-02-03".to_string()
}

fn default_keep_alive() -> u64 {
    60
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            global: GlobalConfig::default(),
            devices: Vec::new(),
        }
    }
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            poll_timeout_ms: default_poll_timeout(),
            request_timeout_ms: default_request_timeout(),
            api_version: default_api_version(),
        }
    }
}

impl HubConfig {
    /// Find a device profile by name
    pub fn find_device(&self, name: &str) -> Option<&DeviceProfile> {
        self.devices.iter().find(|device| device.name == name)
    }
}

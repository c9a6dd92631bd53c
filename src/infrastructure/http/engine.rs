use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::core::communication::message::{DeliveryToken, Message, PropertyBag};
use crate::core::communication::settlement::SettlementOutcome;
use crate::domain::config::{ConnectionConfig, GlobalConfig, ProtocolKind};
use crate::domain::error::{ConnectionError, DeliveryError, HubResult, SettlementError};
use crate::infrastructure::http::batch::encode_batch;
use crate::infrastructure::http::{HttpExecutor, HttpMethod, HttpRequest, HttpResponse};

/// Content type of batched event bodies
pub const BATCH_CONTENT_TYPE: &str = "application/vnd.microsoft.iothub.json";

/// Prefix of response headers that carry application properties
pub const APP_PROPERTY_PREFIX: &str = "iothub-app-";

/// Polling protocol tunables
#[derive(Debug, Clone)]
pub struct PollingSettings {
    pub api_version: String,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for PollingSettings {
    fn default() -> Self {
        Self {
            api_version: "2016-02-03".to_string(),
            user_agent: concat!("hublink/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&GlobalConfig> for PollingSettings {
    fn from(global: &GlobalConfig) -> Self {
        Self {
            api_version: global.api_version.clone(),
            request_timeout: Duration::from_millis(global.request_timeout_ms),
            ..Self::default()
        }
    }
}

/// Request/response engine: every operation is an independent round trip.
///
/// Holds no state besides configuration, so concurrent sends are safe.
pub struct PollingEngine {
    config: ConnectionConfig,
    settings: PollingSettings,
    executor: Arc<dyn HttpExecutor>,
}

impl PollingEngine {
    pub fn new(
        config: ConnectionConfig,
        settings: PollingSettings,
        executor: Arc<dyn HttpExecutor>,
    ) -> HubResult<Self> {
        config.validate(ProtocolKind::Http)?;

        Ok(Self {
            config,
            settings,
            executor,
        })
    }

    pub fn event_path(&self) -> String {
        format!("/devices/{}/messages/events", self.config.device_id)
    }

    pub fn devicebound_path(&self) -> String {
        format!("/devices/{}/messages/devicebound", self.config.device_id)
    }

    fn version_query(&self) -> String {
        format!("?api-version={}", self.settings.api_version)
    }

    fn base_headers(&self, routing_path: &str) -> Vec<(String, String)> {
        vec![
            ("Authorization".to_string(), self.config.credential.clone()),
            ("iothub-to".to_string(), routing_path.to_string()),
            ("User-Agent".to_string(), self.settings.user_agent.clone()),
        ]
    }

    /// Single event: message properties become additional headers
    pub fn build_event_request(&self, message: &Message) -> HttpRequest {
        let path = self.event_path();
        let mut headers = self.base_headers(&path);
        headers.extend(
            message
                .properties()
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string())),
        );

        HttpRequest {
            method: HttpMethod::Post,
            path: format!("{}{}", path, self.version_query()),
            headers,
            body: message.payload().to_vec(),
        }
    }

    pub fn build_batch_request(&self, messages: &[Message]) -> HubResult<HttpRequest> {
        let path = self.event_path();
        let mut headers = self.base_headers(&path);
        headers.push(("Content-Type".to_string(), BATCH_CONTENT_TYPE.to_string()));

        Ok(HttpRequest {
            method: HttpMethod::Post,
            path: format!("{}{}", path, self.version_query()),
            headers,
            body: encode_batch(messages)?,
        })
    }

    pub fn build_receive_request(&self) -> HttpRequest {
        let path = self.devicebound_path();

        HttpRequest {
            method: HttpMethod::Get,
            path: format!("{}{}", path, self.version_query()),
            headers: self.base_headers(&path),
            body: Vec::new(),
        }
    }

    /// Settlement requests address the lock token, never engine state
    pub fn build_settle_request(
        &self,
        lock_token: &str,
        outcome: SettlementOutcome,
    ) -> HttpRequest {
        let routing_path = self.devicebound_path();
        let message_path = format!("{}/{}", routing_path, lock_token);
        let (method, path) = match outcome {
            SettlementOutcome::Completed => (
                HttpMethod::Delete,
                format!("{}{}", message_path, self.version_query()),
            ),
            SettlementOutcome::Rejected => (
                HttpMethod::Delete,
                format!("{}{}&reject", message_path, self.version_query()),
            ),
            SettlementOutcome::Abandoned => (
                HttpMethod::Post,
                format!("{}/abandon{}", message_path, self.version_query()),
            ),
        };

        let mut headers = self.base_headers(&routing_path);
        headers.push(("If-Match".to_string(), format!("\"{}\"", lock_token)));

        HttpRequest {
            method,
            path,
            headers,
            body: Vec::new(),
        }
    }

    pub async fn send_event(&self, message: &Message) -> Result<(), DeliveryError> {
        let request = self.build_event_request(message);
        self.deliver(request).await?;

        debug!(
            "Sent event of {} bytes for device '{}'",
            message.payload().len(),
            self.config.device_id
        );
        Ok(())
    }

    /// All-or-nothing: one request carries the whole batch
    pub async fn send_event_batch(&self, messages: &[Message]) -> HubResult<()> {
        let request = self.build_batch_request(messages)?;
        self.deliver(request).await?;

        info!("Sent batch of {} events for device '{}'", messages.len(), self.config.device_id);
        Ok(())
    }

    async fn deliver(&self, request: HttpRequest) -> Result<HttpResponse, DeliveryError> {
        let response = self
            .executor
            .execute(&self.config.host, request)
            .await
            .map_err(|e| DeliveryError::Request(e.to_string()))?;

        if response.is_success() {
            Ok(response)
        } else {
            warn!("Hub rejected event with status {}", response.status);
            Err(DeliveryError::Rejected { response })
        }
    }

    /// One receive round trip; `None` when the hub has nothing queued
    pub async fn poll(&self) -> Result<Option<Message>, ConnectionError> {
        let request = self.build_receive_request();
        let response = self
            .executor
            .execute(&self.config.host, request)
            .await
            .map_err(|e| ConnectionError::Request(e.to_string()))?;

        if !response.is_success() {
            return Err(ConnectionError::Status {
                status: response.status,
                body: response.body_as_string(),
            });
        }

        let lock_token = response
            .header("ETag")
            .map(|etag| etag.trim().trim_matches('"').to_string())
            .filter(|etag| !etag.is_empty());

        let lock_token = match lock_token {
            Some(token) => token,
            None if response.status == 204 || response.body.is_empty() => return Ok(None),
            None => {
                return Err(ConnectionError::Request(
                    "message response carries no lock token".to_string(),
                ))
            }
        };

        let mut properties = PropertyBag::new();
        for (key, value) in &response.headers {
            let lowered = key.to_ascii_lowercase();
            if let Some(name) = lowered.strip_prefix(APP_PROPERTY_PREFIX) {
                if let Err(e) = properties.insert(name, value.clone()) {
                    warn!("Skipping inbound property '{}': {}", name, e);
                }
            }
        }

        debug!("Received message with lock token '{}'", lock_token);
        Ok(Some(Message::inbound(
            response.body,
            properties,
            DeliveryToken::Lock(lock_token),
        )))
    }

    pub async fn settle(
        &self,
        token: &DeliveryToken,
        outcome: SettlementOutcome,
    ) -> Result<(), SettlementError> {
        let lock_token = match token {
            DeliveryToken::Lock(lock_token) => lock_token,
            DeliveryToken::Tag(_) => {
                return Err(SettlementError::UnknownToken { token: token.to_string() })
            }
        };

        let request = self.build_settle_request(lock_token, outcome);
        let response = self
            .executor
            .execute(&self.config.host, request)
            .await
            .map_err(|e| SettlementError::Request(e.to_string()))?;

        if response.is_success() {
            Ok(())
        } else {
            Err(SettlementError::Rejected { response })
        }
    }
}

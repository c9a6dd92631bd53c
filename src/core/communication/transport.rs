use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::core::communication::engine::ProtocolEngine;
use crate::core::communication::message::Message;
use crate::core::communication::receiver::{Receiver, ReceiverState};
use crate::domain::config::{ConnectionConfig, DeviceProfile, GlobalConfig, ProtocolKind};
use crate::domain::error::{ConnectionError, HubError, HubResult, SettlementError};
use crate::infrastructure::http::{HttpExecutor, PollingEngine, PollingSettings, ReqwestExecutor};
use crate::infrastructure::mqtt::{LinkConnector, LinkSettings, MqttConnector, PersistentLinkEngine};

const STATE_CHANNEL_CAPACITY: usize = 16;

/// Connection state changes published by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    /// The persistent link dropped; it is not re-established automatically
    Lost(String),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Lost(reason) => write!(f, "lost ({})", reason),
        }
    }
}

type ConnectOutcome = Option<Result<(), ConnectionError>>;

enum LinkStatus {
    Disconnected,
    /// Later callers wait on the first caller's outcome
    Connecting(watch::Receiver<ConnectOutcome>),
    Connected,
}

/// Resets a connect attempt whose future was dropped before it finished
struct ConnectAttempt<'a> {
    status: &'a Mutex<LinkStatus>,
    finished: bool,
}

impl Drop for ConnectAttempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let mut status = lock_status(self.status);
            if matches!(*status, LinkStatus::Connecting(_)) {
                *status = LinkStatus::Disconnected;
            }
        }
    }
}

fn lock_status(status: &Mutex<LinkStatus>) -> MutexGuard<'_, LinkStatus> {
    status.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Protocol-agnostic device client.
///
/// Wraps exactly one protocol engine for its whole life. Connect and
/// disconnect are serialized; a connect issued while another is in flight
/// shares that attempt's outcome instead of opening a second link.
pub struct HubTransport {
    engine: ProtocolEngine,
    status: Mutex<LinkStatus>,
    lifecycle: AsyncMutex<()>,
    receiver: AsyncMutex<Option<Arc<Receiver>>>,
    state_events: broadcast::Sender<ConnectionState>,
}

impl HubTransport {
    fn with_engine(
        engine: ProtocolEngine,
        state_events: broadcast::Sender<ConnectionState>,
    ) -> Self {
        Self {
            engine,
            status: Mutex::new(LinkStatus::Disconnected),
            lifecycle: AsyncMutex::new(()),
            receiver: AsyncMutex::new(None),
            state_events,
        }
    }

    /// Transport over the polling protocol with a caller-supplied executor
    pub fn polling(
        config: ConnectionConfig,
        settings: PollingSettings,
        executor: Arc<dyn HttpExecutor>,
    ) -> HubResult<Self> {
        let engine = PollingEngine::new(config, settings, executor)?;
        let (state_events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        Ok(Self::with_engine(ProtocolEngine::Polling(Arc::new(engine)), state_events))
    }

    /// Transport over the persistent link with a caller-supplied connector
    pub fn persistent_link(
        config: ConnectionConfig,
        settings: LinkSettings,
        connector: Arc<dyn LinkConnector>,
    ) -> HubResult<Self> {
        let (state_events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);
        let engine = PersistentLinkEngine::new(config, settings, connector, state_events.clone())?;
        Ok(Self::with_engine(
            ProtocolEngine::PersistentLink(Arc::new(engine)),
            state_events,
        ))
    }

    /// HTTPS polling transport with default settings
    pub fn http(config: ConnectionConfig) -> HubResult<Self> {
        Self::http_with(config, PollingSettings::default())
    }

    fn http_with(config: ConnectionConfig, settings: PollingSettings) -> HubResult<Self> {
        config.validate(ProtocolKind::Http)?;
        let executor = ReqwestExecutor::new(settings.request_timeout)?;
        Self::polling(config, settings, Arc::new(executor))
    }

    /// MQTT transport with default settings
    pub fn mqtt(config: ConnectionConfig) -> HubResult<Self> {
        Self::persistent_link(config, LinkSettings::default(), Arc::new(MqttConnector::default()))
    }

    /// Build the production transport a device profile describes
    pub fn from_profile(profile: &DeviceProfile, global: &GlobalConfig) -> HubResult<Self> {
        match profile.protocol {
            ProtocolKind::Http => {
                Self::http_with(profile.connection.clone(), PollingSettings::from(global))
            }
            ProtocolKind::Mqtt => Self::persistent_link(
                profile.connection.clone(),
                LinkSettings::from(profile),
                Arc::new(MqttConnector::default()),
            ),
        }
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.engine.kind()
    }

    pub fn is_connected(&self) -> bool {
        matches!(*lock_status(&self.status), LinkStatus::Connected)
    }

    /// Subscribe to connection state changes
    pub fn connection_events(&self) -> broadcast::Receiver<ConnectionState> {
        self.state_events.subscribe()
    }

    fn publish_state(&self, state: ConnectionState) {
        debug!("Connection state: {}", state);
        let _ = self.state_events.send(state);
    }

    /// Establish the link; a no-op when already connected
    pub async fn connect(&self) -> HubResult<()> {
        let (outcome, leader) = {
            let mut status = lock_status(&self.status);
            match &*status {
                LinkStatus::Connected => return Ok(()),
                LinkStatus::Connecting(outcome) => (outcome.clone(), None),
                LinkStatus::Disconnected => {
                    let (tx, rx) = watch::channel(None);
                    *status = LinkStatus::Connecting(rx.clone());
                    (rx, Some(tx))
                }
            }
        };

        match leader {
            Some(tx) => self.lead_connect(tx).await,
            None => {
                debug!("Joining in-flight connect");
                Ok(wait_for_outcome(outcome).await?)
            }
        }
    }

    async fn lead_connect(&self, outcome: watch::Sender<ConnectOutcome>) -> HubResult<()> {
        let mut attempt = ConnectAttempt {
            status: &self.status,
            finished: false,
        };
        self.publish_state(ConnectionState::Connecting);

        let result = {
            let _lifecycle = self.lifecycle.lock().await;
            let result = self.engine.connect().await;
            *lock_status(&self.status) = match result {
                Ok(()) => LinkStatus::Connected,
                Err(_) => LinkStatus::Disconnected,
            };
            attempt.finished = true;
            result
        };
        outcome.send_replace(Some(result.clone()));

        match &result {
            Ok(()) => {
                info!("{} transport connected", self.protocol());
                self.publish_state(ConnectionState::Connected);
            }
            Err(e) => {
                warn!("{} transport failed to connect: {}", self.protocol(), e);
                self.publish_state(ConnectionState::Disconnected);
            }
        }
        Ok(result?)
    }

    /// Close the receiver and tear down the link; safe when not connected
    pub async fn disconnect(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let mut slot = self.receiver.lock().await;

        if let Some(receiver) = slot.take() {
            receiver.close();
        }

        let was_connected = {
            let mut status = lock_status(&self.status);
            let connected = matches!(*status, LinkStatus::Connected);
            if connected {
                *status = LinkStatus::Disconnected;
            }
            connected
        };

        self.engine.disconnect().await;

        if was_connected {
            info!("{} transport disconnected", self.protocol());
            self.publish_state(ConnectionState::Disconnected);
        }
    }

    fn ensure_connected(&self) -> Result<(), ConnectionError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::NotConnected)
        }
    }

    /// Send one event.
    ///
    /// An absent message is rejected before any network activity.
    pub async fn send_event(&self, message: impl Into<Option<Message>>) -> HubResult<()> {
        let message = message
            .into()
            .ok_or_else(|| HubError::InvalidArgument("message must be provided".to_string()))?;
        self.ensure_connected()?;

        self.engine.send_event(&message).await
    }

    /// Send all messages in one request; all-or-nothing
    pub async fn send_event_batch(&self, messages: &[Message]) -> HubResult<()> {
        if !self.protocol().supports_batch() {
            return Err(HubError::UnsupportedOperation(format!(
                "batch send is not supported by the {} transport",
                self.protocol()
            )));
        }
        if messages.is_empty() {
            return Err(HubError::InvalidArgument(
                "batch must contain at least one message".to_string(),
            ));
        }
        self.ensure_connected()?;

        self.engine.send_event_batch(messages).await
    }

    /// The connection's receiver, created on first use
    pub async fn get_receiver(&self) -> HubResult<Arc<Receiver>> {
        let mut slot = self.receiver.lock().await;
        if let Some(receiver) = slot.as_ref() {
            return Ok(Arc::clone(receiver));
        }
        self.ensure_connected()?;

        let receiver = self.engine.open_receiver().await?;
        *slot = Some(Arc::clone(&receiver));
        info!("{} receiver created", self.protocol());
        Ok(receiver)
    }

    pub async fn receiver_state(&self) -> ReceiverState {
        self.receiver
            .lock()
            .await
            .as_ref()
            .map_or(ReceiverState::Uninitialized, |receiver| receiver.state())
    }

    async fn receiver_for(&self, message: &Message) -> HubResult<Arc<Receiver>> {
        let token = message.delivery_token().ok_or(SettlementError::MissingToken)?;
        let receiver = self.receiver.lock().await.clone();
        receiver.ok_or_else(|| SettlementError::UnknownToken { token: token.to_string() }.into())
    }

    pub async fn complete(&self, message: &Message) -> HubResult<()> {
        self.receiver_for(message).await?.complete(message).await
    }

    pub async fn reject(&self, message: &Message) -> HubResult<()> {
        self.receiver_for(message).await?.reject(message).await
    }

    pub async fn abandon(&self, message: &Message) -> HubResult<()> {
        self.receiver_for(message).await?.abandon(message).await
    }
}

async fn wait_for_outcome(
    mut outcome: watch::Receiver<ConnectOutcome>,
) -> Result<(), ConnectionError> {
    loop {
        let current = outcome.borrow_and_update().clone();
        if let Some(result) = current {
            return result;
        }
        if outcome.changed().await.is_err() {
            return Err(ConnectionError::Link("connect attempt was abandoned".to_string()));
        }
    }
}

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::communication::message::Message;
use crate::core::communication::receiver::Receiver;
use crate::core::communication::transport::ConnectionState;
use crate::domain::config::{ConnectionConfig, DeviceProfile, ProtocolKind, QualityOfService};
use crate::domain::error::{ConnectionError, DeliveryError, HubError, HubResult};
use crate::infrastructure::mqtt::topic;
use crate::infrastructure::mqtt::{
    GatewayAddress, LinkConnector, LinkEvent, LinkOptions, LinkSession,
};

/// Persistent-link tunables
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub qos: QualityOfService,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            qos: QualityOfService::AtMostOnce,
            keep_alive: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&DeviceProfile> for LinkSettings {
    fn from(profile: &DeviceProfile) -> Self {
        Self {
            qos: profile.qos,
            keep_alive: Duration::from_secs(profile.keep_alive_secs),
            ..Self::default()
        }
    }
}

type Listener = Arc<Mutex<Option<Arc<Receiver>>>>;

struct ActiveLink {
    session: Arc<dyn LinkSession>,
    dispatcher: JoinHandle<()>,
}

/// Connection-oriented publish/subscribe engine.
///
/// Owns exactly one physical link. Inbound publishes are pushed to the
/// attached receiver; outbound publishes are written one at a time.
pub struct PersistentLinkEngine {
    options: LinkOptions,
    qos: QualityOfService,
    publish_topic: String,
    subscribe_topic: String,
    connector: Arc<dyn LinkConnector>,
    link: RwLock<Option<ActiveLink>>,
    listener: Listener,
    write_gate: AsyncMutex<()>,
    state_events: broadcast::Sender<ConnectionState>,
}

impl PersistentLinkEngine {
    pub fn new(
        config: ConnectionConfig,
        settings: LinkSettings,
        connector: Arc<dyn LinkConnector>,
        state_events: broadcast::Sender<ConnectionState>,
    ) -> HubResult<Self> {
        config.validate(ProtocolKind::Mqtt)?;
        let gateway = GatewayAddress::parse(config.gateway_host.as_deref().unwrap_or_default())?;

        let options = LinkOptions {
            host: gateway.host,
            port: gateway.port,
            use_tls: gateway.use_tls,
            client_id: config.device_id.clone(),
            username: format!("{}/{}", config.host, config.device_id),
            password: config.credential.clone(),
            clean_session: false,
            keep_alive: settings.keep_alive,
            connect_timeout: settings.connect_timeout,
        };

        Ok(Self {
            options,
            qos: settings.qos,
            publish_topic: topic::event_topic(&config.device_id),
            subscribe_topic: topic::devicebound_topic(&config.device_id),
            connector,
            link: RwLock::new(None),
            listener: Arc::new(Mutex::new(None)),
            write_gate: AsyncMutex::new(()),
            state_events,
        })
    }

    pub fn link_options(&self) -> &LinkOptions {
        &self.options
    }

    pub fn publish_topic(&self) -> &str {
        &self.publish_topic
    }

    pub fn subscribe_topic(&self) -> &str {
        &self.subscribe_topic
    }

    pub async fn is_connected(&self) -> bool {
        self.link.read().await.is_some()
    }

    /// Open the link; a no-op when it is already open
    pub async fn connect(&self) -> Result<(), ConnectionError> {
        let mut link = self.link.write().await;
        if link.is_some() {
            return Ok(());
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let session = self.connector.open(&self.options, events_tx).await?;
        let dispatcher = tokio::spawn(dispatch_inbound(
            events_rx,
            self.subscribe_topic.clone(),
            Arc::clone(&self.listener),
            self.state_events.clone(),
        ));

        *link = Some(ActiveLink {
            session: Arc::from(session),
            dispatcher,
        });

        info!(
            "Persistent link open for '{}' via {}:{}",
            self.options.client_id, self.options.host, self.options.port
        );
        Ok(())
    }

    /// Detach listeners, then close the link.
    ///
    /// Once this returns no inbound callback fires any more.
    pub async fn disconnect(&self) {
        let active = self.link.write().await.take();
        lock_listener(&self.listener).take();

        if let Some(active) = active {
            active.dispatcher.abort();
            let _ = active.dispatcher.await;

            if let Err(e) = active.session.close().await {
                warn!("Failed to close persistent link cleanly: {}", e);
            }
            info!("Persistent link closed for '{}'", self.options.client_id);
        }
    }

    async fn session(&self) -> Result<Arc<dyn LinkSession>, ConnectionError> {
        self.link
            .read()
            .await
            .as_ref()
            .map(|active| Arc::clone(&active.session))
            .ok_or(ConnectionError::NotConnected)
    }

    /// Publish one event; concurrent callers are queued on the write gate
    pub async fn send_event(&self, message: &Message) -> HubResult<()> {
        let session = self.session().await?;
        let topic = topic::publish_topic(&self.publish_topic, message.properties());

        let _gate = self.write_gate.lock().await;
        session
            .publish(&topic, message.payload().to_vec(), self.qos)
            .await
            .map_err(|e| DeliveryError::Link(e.to_string()))?;

        debug!("Published {} bytes to '{}'", message.payload().len(), topic);
        Ok(())
    }

    /// Subscribe to the command topic and attach a push receiver
    pub async fn open_receiver(&self) -> HubResult<Arc<Receiver>> {
        let session = self.session().await?;
        session
            .subscribe(&self.subscribe_topic, self.qos)
            .await
            .map_err(|e| HubError::from(ConnectionError::Link(e.to_string())))?;

        let receiver = Arc::new(Receiver::push(ProtocolKind::Mqtt));
        *lock_listener(&self.listener) = Some(Arc::clone(&receiver));

        info!("Subscribed to '{}'", self.subscribe_topic);
        Ok(receiver)
    }
}

fn lock_listener(listener: &Listener) -> MutexGuard<'_, Option<Arc<Receiver>>> {
    listener.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn dispatch_inbound(
    mut events: mpsc::UnboundedReceiver<LinkEvent>,
    subscribe_topic: String,
    listener: Listener,
    state_events: broadcast::Sender<ConnectionState>,
) {
    while let Some(event) = events.recv().await {
        match event {
            LinkEvent::Publish { topic: inbound_topic, payload } => {
                let Some(properties) = topic::match_inbound(&subscribe_topic, &inbound_topic) else {
                    debug!("Ignoring publish on unrelated topic '{}'", inbound_topic);
                    continue;
                };

                let receiver = lock_listener(&listener).clone();
                match receiver {
                    Some(receiver) => receiver.deliver(payload, properties),
                    None => debug!("Dropping inbound message: no receiver attached"),
                }
            }
            LinkEvent::Lost(reason) => {
                warn!("Persistent link lost: {}", reason);
                let _ = state_events.send(ConnectionState::Lost(reason));
            }
        }
    }
}

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS,
    Transport as MqttWire,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::domain::config::QualityOfService;
use crate::domain::error::ConnectionError;
use crate::infrastructure::mqtt::ack::{lock_acks, AckRegistration, AckTracker};
use crate::infrastructure::mqtt::{LinkConnector, LinkError, LinkEvent, LinkOptions, LinkSession};

const CLOSE_GRACE: Duration = Duration::from_secs(5);

fn to_qos(qos: QualityOfService) -> QoS {
    match qos {
        QualityOfService::AtMostOnce => QoS::AtMostOnce,
        QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
    }
}

/// `rumqttc` connector speaking MQTT 3.1.1
pub struct MqttConnector {
    channel_capacity: usize,
}

impl MqttConnector {
    pub fn new(channel_capacity: usize) -> Self {
        Self { channel_capacity }
    }

    fn mqtt_options(options: &LinkOptions) -> MqttOptions {
        let mut mqtt_options =
            MqttOptions::new(options.client_id.clone(), options.host.clone(), options.port);
        mqtt_options
            .set_credentials(options.username.clone(), options.password.clone())
            .set_clean_session(options.clean_session)
            .set_keep_alive(options.keep_alive);
        if options.use_tls {
            mqtt_options.set_transport(MqttWire::tls_with_default_config());
        }
        mqtt_options
    }
}

impl Default for MqttConnector {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl LinkConnector for MqttConnector {
    async fn open(
        &self,
        options: &LinkOptions,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn LinkSession>, ConnectionError> {
        let (client, eventloop) =
            AsyncClient::new(Self::mqtt_options(options), self.channel_capacity);
        let acks = Arc::new(Mutex::new(AckTracker::new()));
        let (ready_tx, ready_rx) = oneshot::channel();

        let driver = tokio::spawn(drive_event_loop(eventloop, events, Arc::clone(&acks), ready_tx));

        let outcome = match tokio::time::timeout(options.connect_timeout, ready_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(ConnectionError::Link(
                "event loop stopped before the broker answered".to_string(),
            )),
            Err(_) => Err(ConnectionError::Timeout),
        };

        match outcome {
            Ok(()) => {
                info!("MQTT link established to {}:{}", options.host, options.port);
                Ok(Box::new(MqttSession {
                    client,
                    acks,
                    driver: Mutex::new(Some(driver)),
                }))
            }
            Err(e) => {
                driver.abort();
                error!("Failed to open MQTT link to {}:{}: {}", options.host, options.port, e);
                Err(e)
            }
        }
    }
}

/// Polls the event loop until the link drops or is closed.
///
/// There is no reconnect: the loop ends on the first error.
async fn drive_event_loop(
    mut eventloop: EventLoop,
    events: mpsc::UnboundedSender<LinkEvent>,
    acks: Arc<Mutex<AckTracker>>,
    ready: oneshot::Sender<Result<(), ConnectionError>>,
) {
    let mut ready = Some(ready);

    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                let accepted = ack.code == ConnectReturnCode::Success;
                if let Some(ready) = ready.take() {
                    let result = if accepted {
                        Ok(())
                    } else {
                        Err(ConnectionError::Link(format!(
                            "broker refused connection: {:?}",
                            ack.code
                        )))
                    };
                    let _ = ready.send(result);
                }
                if !accepted {
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                debug!("Inbound publish on '{}' ({} bytes)", publish.topic, publish.payload.len());
                let _ = events.send(LinkEvent::Publish {
                    topic: publish.topic,
                    payload: publish.payload.to_vec(),
                });
            }
            Ok(Event::Incoming(Packet::PubAck(puback))) => lock_acks(&acks).on_puback(puback.pkid),
            Ok(Event::Outgoing(Outgoing::Publish(pkid))) => lock_acks(&acks).on_publish_sent(pkid),
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                lock_acks(&acks).fail_all("link closed");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                let reason = e.to_string();
                match ready.take() {
                    Some(ready) => {
                        let _ = ready.send(Err(ConnectionError::Link(reason.clone())));
                    }
                    None => {
                        warn!("MQTT link lost: {}", reason);
                        let _ = events.send(LinkEvent::Lost(reason.clone()));
                    }
                }
                lock_acks(&acks).fail_all(&reason);
                break;
            }
        }
    }
}

struct MqttSession {
    client: AsyncClient,
    acks: Arc<Mutex<AckTracker>>,
    driver: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl LinkSession for MqttSession {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityOfService,
    ) -> Result<(), LinkError> {
        match qos {
            QualityOfService::AtMostOnce => self
                .client
                .publish(topic, QoS::AtMostOnce, false, payload)
                .await
                .map_err(|e| LinkError(e.to_string())),
            QualityOfService::AtLeastOnce => {
                let (ack_tx, ack_rx) = oneshot::channel();
                let registration = AckRegistration::new(&self.acks, ack_tx);
                self.client
                    .publish(topic, QoS::AtLeastOnce, false, payload)
                    .await
                    .map_err(|e| LinkError(e.to_string()))?;
                registration.handed_off();

                ack_rx
                    .await
                    .map_err(|_| LinkError("link closed before acknowledgment".to_string()))?
            }
        }
    }

    async fn subscribe(&self, topic: &str, qos: QualityOfService) -> Result<(), LinkError> {
        self.client
            .subscribe(topic, to_qos(qos))
            .await
            .map_err(|e| LinkError(e.to_string()))
    }

    async fn close(&self) -> Result<(), LinkError> {
        let result = self.client.disconnect().await.map_err(|e| LinkError(e.to_string()));

        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(mut driver) = driver {
            if tokio::time::timeout(CLOSE_GRACE, &mut driver).await.is_err() {
                warn!("MQTT event loop did not stop in time, aborting");
                driver.abort();
            }
        }

        info!("MQTT link closed");
        result
    }
}

use std::sync::Arc;
use tracing::debug;

use crate::core::communication::message::Message;
use crate::core::communication::receiver::Receiver;
use crate::domain::config::ProtocolKind;
use crate::domain::error::{ConnectionError, HubError, HubResult};
use crate::infrastructure::http::PollingEngine;
use crate::infrastructure::mqtt::PersistentLinkEngine;

/// The closed set of protocol engines a transport can drive.
///
/// Capability checks live here; adding a variant means revisiting every
/// match below.
pub(crate) enum ProtocolEngine {
    Polling(Arc<PollingEngine>),
    PersistentLink(Arc<PersistentLinkEngine>),
}

impl ProtocolEngine {
    pub fn kind(&self) -> ProtocolKind {
        match self {
            ProtocolEngine::Polling(_) => ProtocolKind::Http,
            ProtocolEngine::PersistentLink(_) => ProtocolKind::Mqtt,
        }
    }

    pub async fn connect(&self) -> Result<(), ConnectionError> {
        match self {
            // Every polling operation is its own round trip
            ProtocolEngine::Polling(_) => {
                debug!("Polling engine has no link to open");
                Ok(())
            }
            ProtocolEngine::PersistentLink(engine) => engine.connect().await,
        }
    }

    pub async fn disconnect(&self) {
        match self {
            ProtocolEngine::Polling(_) => {}
            ProtocolEngine::PersistentLink(engine) => engine.disconnect().await,
        }
    }

    pub async fn send_event(&self, message: &Message) -> HubResult<()> {
        match self {
            ProtocolEngine::Polling(engine) => Ok(engine.send_event(message).await?),
            ProtocolEngine::PersistentLink(engine) => engine.send_event(message).await,
        }
    }

    pub async fn send_event_batch(&self, messages: &[Message]) -> HubResult<()> {
        match self {
            ProtocolEngine::Polling(engine) => engine.send_event_batch(messages).await,
            ProtocolEngine::PersistentLink(_) => Err(HubError::UnsupportedOperation(format!(
                "{} transport sends events individually; batch send is not available",
                self.kind()
            ))),
        }
    }

    pub async fn open_receiver(&self) -> HubResult<Arc<Receiver>> {
        match self {
            ProtocolEngine::Polling(engine) => Ok(Arc::new(Receiver::poll(Arc::clone(engine)))),
            ProtocolEngine::PersistentLink(engine) => engine.open_receiver().await,
        }
    }
}

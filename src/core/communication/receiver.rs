use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use crate::core::communication::message::{DeliveryToken, Message, PropertyBag};
use crate::core::communication::settlement::{SettlementLedger, SettlementOutcome};
use crate::domain::config::ProtocolKind;
use crate::domain::error::{HubError, HubResult, SettlementError};
use crate::infrastructure::http::PollingEngine;

/// Callback receiving pushed messages
pub type MessageHandler = Arc<dyn Fn(Message) + Send + Sync>;

/// Receiver lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// No receiver has been requested on this connection yet
    Uninitialized,
    Active,
    Closed,
}

impl std::fmt::Display for ReceiverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReceiverState::Uninitialized => write!(f, "uninitialized"),
            ReceiverState::Active => write!(f, "active"),
            ReceiverState::Closed => write!(f, "closed"),
        }
    }
}

struct PushQueue {
    sender: mpsc::UnboundedSender<Message>,
    queue: AsyncMutex<mpsc::UnboundedReceiver<Message>>,
    handler: Mutex<Option<MessageHandler>>,
    next_tag: AtomicU64,
}

enum InboundSource {
    /// Pull: every `receive` is one poll round trip
    Poll(Arc<PollingEngine>),
    /// Push: the engine hands messages over as they arrive
    Push(PushQueue),
}

/// Surfaces inbound messages and tracks their settlement.
///
/// One receiver exists per connection. Every message handed to the caller
/// carries a delivery token that must be settled exactly once through
/// [`Receiver::complete`], [`Receiver::reject`] or [`Receiver::abandon`].
pub struct Receiver {
    protocol: ProtocolKind,
    source: InboundSource,
    ledger: SettlementLedger,
    closed: watch::Sender<bool>,
}

impl Receiver {
    pub(crate) fn poll(engine: Arc<PollingEngine>) -> Self {
        Self::with_source(ProtocolKind::Http, InboundSource::Poll(engine))
    }

    pub(crate) fn push(protocol: ProtocolKind) -> Self {
        let (sender, queue) = mpsc::unbounded_channel();
        Self::with_source(
            protocol,
            InboundSource::Push(PushQueue {
                sender,
                queue: AsyncMutex::new(queue),
                handler: Mutex::new(None),
                next_tag: AtomicU64::new(0),
            }),
        )
    }

    fn with_source(protocol: ProtocolKind, source: InboundSource) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            protocol,
            source,
            ledger: SettlementLedger::new(),
            closed,
        }
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn state(&self) -> ReceiverState {
        if self.is_closed() {
            ReceiverState::Closed
        } else {
            ReceiverState::Active
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Tokens handed out and not yet settled
    pub fn pending_settlements(&self) -> usize {
        self.ledger.pending_count()
    }

    /// Wait up to `timeout` for the next message.
    ///
    /// Returns `Ok(None)` when nothing arrived in time or the receiver was
    /// closed, including a close that happens while this call is waiting.
    pub async fn receive(&self, timeout: Duration) -> HubResult<Option<Message>> {
        if self.is_closed() {
            return Ok(None);
        }
        let closed = self.closed.subscribe();

        let next = async {
            match &self.source {
                InboundSource::Poll(engine) => engine.poll().await.map_err(HubError::from),
                InboundSource::Push(push) => Ok(push.queue.lock().await.recv().await),
            }
        };

        let message = tokio::select! {
            result = tokio::time::timeout(timeout, next) => match result {
                Ok(result) => result?,
                Err(_) => None,
            },
            _ = wait_closed(closed) => {
                debug!("Receive interrupted by close");
                None
            }
        };

        if self.is_closed() {
            // close() could not drain while this call held the queue
            self.drain_queue();
            return Ok(None);
        }

        if let Some(token) = message.as_ref().and_then(Message::delivery_token) {
            self.ledger.register(token.clone());
        }
        Ok(message)
    }

    /// Forward pushed messages to `handler` instead of queueing them.
    ///
    /// Messages already queued stay available through [`Receiver::receive`].
    pub fn set_message_handler<F>(&self, handler: F) -> HubResult<()>
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        match &self.source {
            InboundSource::Push(push) => {
                *push.handler.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) =
                    Some(Arc::new(handler));
                Ok(())
            }
            InboundSource::Poll(_) => Err(HubError::UnsupportedOperation(format!(
                "the {} receiver is pull-based; call receive() instead",
                self.protocol
            ))),
        }
    }

    /// Accept a pushed message from the engine
    pub(crate) fn deliver(&self, payload: Vec<u8>, properties: PropertyBag) {
        let InboundSource::Push(push) = &self.source else {
            warn!("Ignoring pushed message on a pull-based receiver");
            return;
        };
        if self.is_closed() {
            debug!("Dropping message delivered after close");
            return;
        }

        let token = DeliveryToken::Tag(push.next_tag.fetch_add(1, Ordering::Relaxed) + 1);
        let message = Message::inbound(payload, properties, token.clone());
        let handler = push
            .handler
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone();

        match handler {
            Some(handler) => {
                self.ledger.register(token);
                handler(message);
            }
            None => {
                debug!("Queued inbound message {}", token);
                let _ = push.sender.send(message);
            }
        }
    }

    pub async fn complete(&self, message: &Message) -> HubResult<()> {
        self.settle(message, SettlementOutcome::Completed).await
    }

    pub async fn reject(&self, message: &Message) -> HubResult<()> {
        self.settle(message, SettlementOutcome::Rejected).await
    }

    pub async fn abandon(&self, message: &Message) -> HubResult<()> {
        self.settle(message, SettlementOutcome::Abandoned).await
    }

    /// Settle `message` with an outcome chosen at run time
    pub async fn settle(&self, message: &Message, outcome: SettlementOutcome) -> HubResult<()> {
        if self.is_closed() {
            return Err(SettlementError::ReceiverClosed.into());
        }
        let token = message.delivery_token().ok_or(SettlementError::MissingToken)?;
        self.ledger.claim(token)?;

        let result = match &self.source {
            InboundSource::Poll(engine) => engine.settle(token, outcome).await,
            InboundSource::Push(_) => Ok(()),
        };

        match result {
            Ok(()) => {
                self.ledger.finish(token, outcome);
                if self.protocol.settlement_has_wire_effect(outcome) {
                    info!("Message {} {}", token, outcome);
                } else {
                    debug!("Message {} {} locally", token, outcome);
                }
                Ok(())
            }
            Err(e) => {
                self.ledger.release(token);
                warn!("Failed to settle message {}: {}", token, e);
                Err(e.into())
            }
        }
    }

    /// Stop surfacing messages; pending receives resolve with `None`
    pub(crate) fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let abandoned = self.ledger.pending_count();
        self.ledger.clear();
        self.drain_queue();
        info!(
            "{} receiver closed ({} unsettled messages left to redelivery)",
            self.protocol, abandoned
        );
    }

    /// Discard queued pushes; a no-op while a `receive` holds the queue
    fn drain_queue(&self) {
        if let InboundSource::Push(push) = &self.source {
            if let Ok(mut queue) = push.queue.try_lock() {
                queue.close();
                while queue.try_recv().is_ok() {}
            }
        }
    }
}

async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}

// In-memory doubles for the wire capabilities
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::domain::config::QualityOfService;
use crate::domain::error::ConnectionError;
use crate::infrastructure::http::{HttpExecutor, HttpRequest, HttpResponse, RequestFailure};
use crate::infrastructure::mqtt::{LinkConnector, LinkError, LinkEvent, LinkOptions, LinkSession};

enum Scripted {
    Respond(HttpResponse),
    Fail(String),
    Hang,
}

/// Executor answering from a script; an empty script answers 204
pub struct ScriptedExecutor {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().unwrap().push_back(Scripted::Respond(response));
    }

    pub fn push_failure(&self, reason: &str) {
        self.script.lock().unwrap().push_back(Scripted::Fail(reason.to_string()));
    }

    pub fn push_hang(&self) {
        self.script.lock().unwrap().push_back(Scripted::Hang);
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        _host: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse, RequestFailure> {
        self.requests.lock().unwrap().push(request);
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Respond(response)) => Ok(response),
            Some(Scripted::Fail(reason)) => Err(RequestFailure(reason)),
            Some(Scripted::Hang) => std::future::pending().await,
            None => Ok(HttpResponse::new(204, Vec::new(), Vec::new())),
        }
    }
}

/// Shared record of what the link sessions were asked to do
#[derive(Default)]
pub struct LinkRecord {
    pub published: Mutex<Vec<(String, Vec<u8>, QualityOfService)>>,
    pub subscriptions: Mutex<Vec<String>>,
    pub closed: AtomicBool,
    pub publish_delay: Mutex<Duration>,
    /// Most publishes observed in flight at once
    pub peak_publishing: AtomicUsize,
    publishing: AtomicUsize,
}

/// Connector handing out in-memory sessions
pub struct MockConnector {
    pub record: Arc<LinkRecord>,
    opens: AtomicUsize,
    open_delay: Duration,
    refuse: Mutex<Option<ConnectionError>>,
    events: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    last_options: Mutex<Option<LinkOptions>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::with_delay(Duration::ZERO)
    }

    pub fn with_delay(open_delay: Duration) -> Self {
        Self {
            record: Arc::new(LinkRecord::default()),
            opens: AtomicUsize::new(0),
            open_delay,
            refuse: Mutex::new(None),
            events: Mutex::new(None),
            last_options: Mutex::new(None),
        }
    }

    pub fn refuse_with(&self, error: ConnectionError) {
        *self.refuse.lock().unwrap() = Some(error);
    }

    /// Make every publish take `delay` before it is recorded
    pub fn delay_publishes(&self, delay: Duration) {
        *self.record.publish_delay.lock().unwrap() = delay;
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn last_options(&self) -> Option<LinkOptions> {
        self.last_options.lock().unwrap().clone()
    }

    /// Simulate an inbound publish from the broker
    pub fn inject(&self, topic: &str, payload: &[u8]) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(LinkEvent::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
    }

    pub fn lose(&self, reason: &str) {
        if let Some(events) = self.events.lock().unwrap().as_ref() {
            let _ = events.send(LinkEvent::Lost(reason.to_string()));
        }
    }
}

#[async_trait]
impl LinkConnector for MockConnector {
    async fn open(
        &self,
        options: &LinkOptions,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn LinkSession>, ConnectionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.last_options.lock().unwrap() = Some(options.clone());
        if !self.open_delay.is_zero() {
            tokio::time::sleep(self.open_delay).await;
        }
        if let Some(error) = self.refuse.lock().unwrap().clone() {
            return Err(error);
        }

        *self.events.lock().unwrap() = Some(events);
        Ok(Box::new(MockSession {
            record: Arc::clone(&self.record),
        }))
    }
}

struct MockSession {
    record: Arc<LinkRecord>,
}

#[async_trait]
impl LinkSession for MockSession {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityOfService,
    ) -> Result<(), LinkError> {
        if self.record.closed.load(Ordering::SeqCst) {
            return Err(LinkError("session closed".to_string()));
        }
        let publishing = self.record.publishing.fetch_add(1, Ordering::SeqCst) + 1;
        self.record.peak_publishing.fetch_max(publishing, Ordering::SeqCst);

        let delay = *self.record.publish_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.record
            .published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, qos));

        self.record.publishing.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QualityOfService) -> Result<(), LinkError> {
        self.record.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.record.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

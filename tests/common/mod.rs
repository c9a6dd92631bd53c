// Shared in-memory wire doubles for the integration suites
#![allow(dead_code)]

use async_trait::async_trait;
use hublink::{
    ConnectionError, HttpExecutor, HttpRequest, HttpResponse, LinkConnector, LinkError, LinkEvent,
    LinkOptions, LinkSession, QualityOfService, RequestFailure,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

/// What the stub hub answers next
pub enum Reply {
    Status(HttpResponse),
    Unreachable(String),
    NeverAnswer,
}

/// Polling hub double; answers `204` once its script is exhausted
#[derive(Default)]
pub struct StubHub {
    script: Mutex<VecDeque<Reply>>,
    requests: Mutex<Vec<(String, HttpRequest)>>,
}

impl StubHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn reply(&self, reply: Reply) {
        self.script.lock().unwrap().push_back(reply);
    }

    pub fn reply_status(&self, status: u16, body: &str) {
        self.reply(Reply::Status(HttpResponse::new(status, Vec::new(), body.as_bytes().to_vec())));
    }

    /// Queue a devicebound message locked under `lock_token`
    pub fn queue_command(&self, lock_token: &str, body: &str, properties: &[(&str, &str)]) {
        let mut headers = vec![("ETag".to_string(), format!("\"{}\"", lock_token))];
        headers.extend(
            properties
                .iter()
                .map(|(key, value)| (format!("iothub-app-{}", key), value.to_string())),
        );
        self.reply(Reply::Status(HttpResponse::new(200, headers, body.as_bytes().to_vec())));
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn hosts(&self) -> Vec<String> {
        self.requests.lock().unwrap().iter().map(|(host, _)| host.clone()).collect()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpExecutor for StubHub {
    async fn execute(
        &self,
        host: &str,
        request: HttpRequest,
    ) -> Result<HttpResponse, RequestFailure> {
        self.requests.lock().unwrap().push((host.to_string(), request));
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Reply::Status(response)) => Ok(response),
            Some(Reply::Unreachable(reason)) => Err(RequestFailure(reason)),
            Some(Reply::NeverAnswer) => std::future::pending().await,
            None => Ok(HttpResponse::new(204, Vec::new(), Vec::new())),
        }
    }
}

/// Broker double handing out in-memory links
#[derive(Default)]
pub struct StubBroker {
    opens: AtomicUsize,
    closed: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Vec<u8>, QualityOfService)>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    options: Mutex<Option<LinkOptions>>,
    inbound: Mutex<Option<mpsc::UnboundedSender<LinkEvent>>>,
    refuse: Mutex<Option<ConnectionError>>,
}

impl StubBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn refuse(&self, error: ConnectionError) {
        *self.refuse.lock().unwrap() = Some(error);
    }

    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn options(&self) -> Option<LinkOptions> {
        self.options.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, QualityOfService)> {
        self.published.lock().unwrap().clone()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Publish from the cloud side
    pub fn push(&self, topic: &str, payload: &[u8]) {
        if let Some(inbound) = self.inbound.lock().unwrap().as_ref() {
            let _ = inbound.send(LinkEvent::Publish {
                topic: topic.to_string(),
                payload: payload.to_vec(),
            });
        }
    }

    pub fn drop_link(&self, reason: &str) {
        if let Some(inbound) = self.inbound.lock().unwrap().as_ref() {
            let _ = inbound.send(LinkEvent::Lost(reason.to_string()));
        }
    }
}

#[async_trait]
impl LinkConnector for StubBroker {
    async fn open(
        &self,
        options: &LinkOptions,
        events: mpsc::UnboundedSender<LinkEvent>,
    ) -> Result<Box<dyn LinkSession>, ConnectionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        *self.options.lock().unwrap() = Some(options.clone());
        if let Some(error) = self.refuse.lock().unwrap().clone() {
            return Err(error);
        }

        *self.inbound.lock().unwrap() = Some(events);
        self.closed.store(false, Ordering::SeqCst);
        Ok(Box::new(StubLink {
            closed: Arc::clone(&self.closed),
            published: Arc::clone(&self.published),
            subscriptions: Arc::clone(&self.subscriptions),
        }))
    }
}

struct StubLink {
    closed: Arc<AtomicBool>,
    published: Arc<Mutex<Vec<(String, Vec<u8>, QualityOfService)>>>,
    subscriptions: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl LinkSession for StubLink {
    async fn publish(
        &self,
        topic: &str,
        payload: Vec<u8>,
        qos: QualityOfService,
    ) -> Result<(), LinkError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(LinkError("link closed".to_string()));
        }
        self.published.lock().unwrap().push((topic.to_string(), payload, qos));
        Ok(())
    }

    async fn subscribe(&self, topic: &str, _qos: QualityOfService) -> Result<(), LinkError> {
        self.subscriptions.lock().unwrap().push(topic.to_string());
        Ok(())
    }

    async fn close(&self) -> Result<(), LinkError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

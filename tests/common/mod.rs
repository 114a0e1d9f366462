//! Shared test fixtures: a scripted transport and a recording observer.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use ladon_net::{
    AttemptEvent, CallEvent, CircuitTransition, HttpClient, HttpClientConfig, RequestObserver,
    Transport, TransportError, TransportRequest, TransportResponse,
};

/// A scripted reply.
#[derive(Debug, Clone)]
pub enum Reply {
    Response {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<Bytes>,
    },
    Error(TransportError),
    /// Never answers; only a timeout ends the exchange.
    Hang,
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply::Response {
            status,
            headers: Vec::new(),
            body: vec![Bytes::from_static(b"ok")],
        }
    }

    pub fn body(status: u16, content_type: &str, body: &'static str) -> Self {
        Reply::Response {
            status,
            headers: vec![("content-type".to_string(), content_type.to_string())],
            body: vec![Bytes::from_static(body.as_bytes())],
        }
    }
}

/// Transport that answers from a queue and records every request.
///
/// `/robots.txt` requests are answered separately and not queued or counted
/// as calls. Without a configured robots.txt they get a 404.
pub struct MockTransport {
    replies: Mutex<VecDeque<Reply>>,
    robots: Mutex<Option<Reply>>,
    requests: Mutex<Vec<TransportRequest>>,
    robots_fetches: AtomicUsize,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(VecDeque::new()),
            robots: Mutex::new(None),
            requests: Mutex::new(Vec::new()),
            robots_fetches: AtomicUsize::new(0),
        })
    }

    pub fn push(&self, reply: Reply) {
        self.replies.lock().unwrap().push_back(reply);
    }

    pub fn push_status(&self, status: u16, times: usize) {
        for _ in 0..times {
            self.push(Reply::status(status));
        }
    }

    pub fn set_robots(&self, status: u16, body: &'static str) {
        *self.robots.lock().unwrap() = Some(Reply::body(status, "text/plain", body));
    }

    pub fn set_robots_reply(&self, reply: Reply) {
        *self.robots.lock().unwrap() = Some(reply);
    }

    /// Non-robots requests sent so far.
    pub fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<TransportRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn robots_fetches(&self) -> usize {
        self.robots_fetches.load(Ordering::SeqCst)
    }

    async fn answer(
        reply: Reply,
        request: &TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        match reply {
            Reply::Response {
                status,
                headers,
                body,
            } => Ok(TransportResponse {
                status,
                reason: None,
                url: request.url.to_string(),
                headers: headers.into_iter().collect::<HashMap<_, _>>(),
                body: futures::stream::iter(body.into_iter().map(Ok)).boxed(),
            }),
            Reply::Error(error) => Err(error),
            Reply::Hang => {
                std::future::pending::<()>().await;
                Err(TransportError::Timeout("unreachable".to_string()))
            }
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn execute(&self, request: TransportRequest) -> Result<TransportResponse, TransportError> {
        if request.url.path() == "/robots.txt" {
            self.robots_fetches.fetch_add(1, Ordering::SeqCst);
            let reply = self
                .robots
                .lock()
                .unwrap()
                .clone()
                .unwrap_or_else(|| Reply::status(404));
            return Self::answer(reply, &request).await;
        }

        self.requests.lock().unwrap().push(request.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Reply::status(200));
        Self::answer(reply, &request).await
    }
}

/// Observer that keeps every event.
#[derive(Default)]
pub struct RecordingObserver {
    pub attempts: Mutex<Vec<AttemptEvent>>,
    pub calls: Mutex<Vec<CallEvent>>,
    pub transitions: Mutex<Vec<CircuitTransition>>,
}

impl RecordingObserver {
    pub fn transitions(&self) -> Vec<CircuitTransition> {
        self.transitions.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> Vec<AttemptEvent> {
        self.attempts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<CallEvent> {
        self.calls.lock().unwrap().clone()
    }
}

impl RequestObserver for RecordingObserver {
    fn on_attempt(&self, event: &AttemptEvent) {
        self.attempts.lock().unwrap().push(event.clone());
    }

    fn on_call(&self, event: &CallEvent) {
        self.calls.lock().unwrap().push(event.clone());
    }

    fn on_circuit_transition(&self, transition: &CircuitTransition) {
        self.transitions.lock().unwrap().push(transition.clone());
    }
}

/// Config with rate limiting off so tests only wait where they mean to.
pub fn test_config() -> HttpClientConfig {
    let mut config = HttpClientConfig::default();
    config.rate_limit.enabled = false;
    config
}

pub fn client_with(
    config: HttpClientConfig,
    transport: Arc<MockTransport>,
) -> (HttpClient, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::default());
    let client = HttpClient::builder(config)
        .transport(transport)
        .observer(observer.clone())
        .build()
        .expect("valid test config");
    (client, observer)
}

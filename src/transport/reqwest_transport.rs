//! reqwest-backed transport.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{Client, Proxy};

use super::{BodyStream, Transport, TransportError, TransportRequest, TransportResponse};
use crate::config::HttpClientConfig;
use crate::error::ConfigError;

/// Production transport over a pooled reqwest client.
///
/// Connect timeout, proxy and TLS verification are client-level in reqwest,
/// so they come from the config and `timeouts.connect` on a request is not
/// consulted. The total timeout is applied per request and the read timeout
/// bounds the wait for each body chunk.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Build a transport from validated configuration.
    pub fn new(config: &HttpClientConfig) -> Result<Self, ConfigError> {
        let mut builder = Client::builder()
            .gzip(true)
            .brotli(true)
            .danger_accept_invalid_certs(!config.verify_tls);

        if let Some(connect) = config.timeouts.connect() {
            builder = builder.connect_timeout(connect);
        }
        if let Some(read) = config.timeouts.read() {
            builder = builder.read_timeout(read);
        }
        if let Some(proxy) = &config.proxy {
            let proxy = Proxy::all(proxy).map_err(|e| ConfigError::Transport(e.to_string()))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ConfigError::Transport(e.to_string()))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn from_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn execute(
        &self,
        request: TransportRequest,
    ) -> Result<TransportResponse, TransportError> {
        let mut builder = self.client.request(request.method, request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }
        if let Some(total) = request.timeouts.total {
            builder = builder.timeout(total);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;

        let status = response.status();
        let headers = collect_headers(response.headers());
        let url = response.url().to_string();
        let body = response
            .bytes_stream()
            .map_err(|e| match map_reqwest_error(e) {
                TransportError::Protocol(detail) => TransportError::Body(detail),
                other => other,
            })
            .boxed();
        let body = match request.timeouts.read {
            Some(read) => with_read_timeout(body, read),
            None => body,
        };

        Ok(TransportResponse {
            status: status.as_u16(),
            reason: status.canonical_reason().map(str::to_string),
            url,
            headers,
            body,
        })
    }
}

/// Flatten response headers, joining repeated values.
fn collect_headers(map: &HeaderMap) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = HashMap::new();
    for (name, value) in map {
        let Ok(value) = value.to_str() else {
            continue;
        };
        if *name == SET_COOKIE {
            headers.insert(name.as_str().to_string(), value.to_string());
            continue;
        }
        headers
            .entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(value);
            })
            .or_insert_with(|| value.to_string());
    }
    headers
}

/// Fail the body with a timeout when no chunk arrives within `read`.
fn with_read_timeout(body: BodyStream, read: Duration) -> BodyStream {
    futures::stream::unfold(Some(body), move |state| async move {
        let mut body = state?;
        match tokio::time::timeout(read, body.next()).await {
            Ok(Some(chunk)) => Some((chunk, Some(body))),
            Ok(None) => None,
            Err(_) => Some((
                Err(TransportError::Timeout(format!(
                    "no body data within {:?}",
                    read
                ))),
                None,
            )),
        }
    })
    .boxed()
}

fn map_reqwest_error(error: reqwest::Error) -> TransportError {
    if error.is_builder() {
        TransportError::Request(error.to_string())
    } else if error.is_timeout() {
        TransportError::Timeout(error.to_string())
    } else if error.is_connect() {
        TransportError::Connect(error.to_string())
    } else {
        TransportError::Protocol(error.to_string())
    }
}

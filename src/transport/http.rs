use crate::config::StreamConfig;
use crate::pipeline::normalize::{ErrorEnvelope, Normalizer};
use crate::pipeline::stream::{stream_turn, TurnStream};
use crate::types::conversation::Conversation;
use crate::{BoxStream, Error, Result};
use bytes::Bytes;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::debug;

/// Sends streaming requests to one vendor endpoint.
///
/// Authentication and request shaping belong to the caller: headers and the JSON body
/// are passed through as given.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    config: StreamConfig,
}

impl HttpTransport {
    pub fn new(base_url: impl Into<String>, config: StreamConfig) -> Result<Self> {
        config.validate()?;

        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .pool_max_idle_per_host(
                env::var("AI_HTTP_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(
                env::var("AI_HTTP_POOL_IDLE_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse::<u64>().ok())
                    .unwrap_or(90),
            )))
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Ok(proxy_url) = env::var("AI_PROXY_URL") {
            if let Ok(proxy) = Proxy::all(&proxy_url) {
                builder = builder.proxy(proxy);
            }
        }

        let client = builder.build().map_err(TransportError::Http)?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            config,
        })
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// POSTs `body` to `path` asking for an event stream.
    pub async fn post_stream(
        &self,
        path: &str,
        headers: HeaderMap,
        body: &serde_json::Value,
    ) -> Result<reqwest::Response> {
        let url = format!("{}{}", self.base_url, path);
        debug!(url = %url, "sending streaming request");
        self.client
            .post(&url)
            .headers(headers)
            .header(ACCEPT, "text/event-stream")
            .json(body)
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))
    }

    /// Sends the request and streams the assistant turn it answers into `conversation`.
    ///
    /// A non-2xx answer fails here, decoded with the normalizer's error envelope when possible.
    pub async fn stream_turn<N: Normalizer>(
        &self,
        conversation: Conversation,
        path: &str,
        headers: HeaderMap,
        body: &serde_json::Value,
        normalizer: N,
    ) -> Result<TurnStream> {
        let resp = self.post_stream(path, headers, body).await?;
        let bytes = body_stream::<N::Envelope>(resp).await?;
        Ok(stream_turn(conversation, bytes, normalizer, &self.config))
    }
}

/// Converts a response into the byte stream the SSE decoder consumes.
///
/// Non-2xx responses are read whole and decoded as the vendor's error envelope `E`,
/// falling back to [`Error::Remote`] with the raw body.
pub async fn body_stream<E: ErrorEnvelope>(
    resp: reqwest::Response,
) -> Result<BoxStream<'static, Bytes>> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp
            .text()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e)))?;
        debug!(status = status.as_u16(), bytes = body.len(), "error response");
        return Err(match serde_json::from_str::<E>(&body) {
            Ok(envelope) => Error::Vendor(envelope.into_vendor_error()),
            Err(_) => Error::Remote {
                status: status.as_u16(),
                body,
            },
        });
    }

    let byte_stream = resp
        .bytes_stream()
        .map_err(|e| Error::Transport(TransportError::Http(e)));
    Ok(Box::pin(byte_stream))
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Transport error: {0}")]
    Other(String),
}

//! HTTP transport
//!
//! `reqwest` implementations of the transport seams: dispatcher-based shard
//! discovery, ranged and whole-object GETs, and a static token provider.
//!
//! Ranged bodies have no overall deadline. A download fails only when no
//! data arrives for the configured timeout, so large slow reads still finish.

use crate::config::ClientConfig;
use crate::transport::{ByteStream, RangeFetcher, ShardClass, ShardDiscovery, TokenProvider};
use async_trait::async_trait;
use bytes::Bytes;
use cirrus_core::error::{CirrusError, Result};
use futures::{stream, Stream, StreamExt, TryStreamExt};
use parking_lot::RwLock;
use reqwest::header::{ACCEPT, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Map a `reqwest` error onto the crate error
pub fn map_reqwest_error(err: reqwest::Error) -> CirrusError {
    let url = err.url().map(|u| u.to_string()).unwrap_or_default();
    match err.status() {
        Some(StatusCode::NOT_FOUND) => CirrusError::NotFound(url),
        Some(status) if status.is_server_error() => CirrusError::Server {
            status: status.as_u16(),
            url,
        },
        _ => CirrusError::Transport(err.to_string()),
    }
}

/// Classify a response status: 404 is terminal, 5xx blames the endpoint
fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    let url = response.url().to_string();
    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::NOT_FOUND {
        Err(CirrusError::NotFound(url))
    } else if status.is_server_error() {
        Err(CirrusError::Server {
            status: status.as_u16(),
            url,
        })
    } else {
        Err(CirrusError::Transport(format!("HTTP {} from {}", status, url)))
    }
}

/// `Range` header value for the half-open range `[start, end)`
pub fn range_header(start: u64, end: u64) -> String {
    format!("bytes={}-{}", start, end.saturating_sub(1))
}

/// First byte of a `Content-Range: bytes a-b/total` value
pub fn content_range_start(value: &str) -> Option<u64> {
    value
        .trim()
        .strip_prefix("bytes ")?
        .split('-')
        .next()?
        .trim()
        .parse()
        .ok()
}

/// Check that a ranged response starts at `start`.
///
/// `206` must carry a `Content-Range` beginning at `start`. A `200` means the
/// server ignored the range and sent the whole object, which is only usable
/// when reading from offset zero.
pub fn check_range(
    status: StatusCode,
    content_range: Option<&str>,
    start: u64,
    url: &str,
) -> Result<()> {
    match status {
        StatusCode::PARTIAL_CONTENT => match content_range.and_then(content_range_start) {
            Some(first) if first == start => Ok(()),
            Some(first) => Err(CirrusError::Transport(format!(
                "{} answered bytes from {} instead of {}",
                url, first, start
            ))),
            None => Err(CirrusError::Transport(format!(
                "{} answered 206 without a usable Content-Range",
                url
            ))),
        },
        StatusCode::OK if start == 0 => Ok(()),
        other => Err(CirrusError::Transport(format!(
            "HTTP {} for a range starting at {} from {}",
            other, start, url
        ))),
    }
}

/// Bound a response body: at most `limit` bytes, and an error when no chunk
/// arrives within `idle`
pub fn guarded_body<S>(body: S, idle: Duration, limit: u64) -> ByteStream
where
    S: Stream<Item = Result<Bytes>> + Send + 'static,
{
    Box::pin(stream::unfold(
        (Box::pin(body), limit),
        move |(mut body, remaining)| async move {
            if remaining == 0 {
                return None;
            }
            match tokio::time::timeout(idle, body.next()).await {
                Err(_) => {
                    let err = CirrusError::Transport(format!("no data received for {:?}", idle));
                    Some((Err(err), (body, 0)))
                }
                Ok(None) => None,
                Ok(Some(Err(e))) => Some((Err(e), (body, 0))),
                Ok(Some(Ok(mut chunk))) => {
                    if chunk.len() as u64 > remaining {
                        chunk.truncate(remaining as usize);
                    }
                    let remaining = remaining - chunk.len() as u64;
                    Some((Ok(chunk), (body, remaining)))
                }
            }
        },
    ))
}

/// Parse a dispatcher response: one `url ip count` line per shard
pub fn parse_dispatcher_body(body: &str) -> Vec<String> {
    body.lines()
        .filter_map(|line| line.split_whitespace().next())
        .map(str::to_string)
        .collect()
}

/// HTTP transport for discovery and downloads
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    dispatcher_url: String,
    timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| CirrusError::Configuration(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            dispatcher_url: config.dispatcher_url.trim_end_matches('/').to_string(),
            timeout: config.timeout,
        })
    }
}

#[async_trait]
impl ShardDiscovery for HttpTransport {
    #[instrument(skip(self))]
    async fn discover_shards(&self, class: ShardClass) -> Result<Vec<String>> {
        let url = format!("{}/{}", self.dispatcher_url, class.dispatcher_key());
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let body = check_status(response)?
            .text()
            .await
            .map_err(map_reqwest_error)?;

        let shards = parse_dispatcher_body(&body);
        debug!(url = %url, count = shards.len(), "Dispatcher answered");
        if shards.is_empty() {
            return Err(CirrusError::NoShardsAvailable(class.to_string()));
        }
        Ok(shards)
    }
}

#[async_trait]
impl RangeFetcher for HttpTransport {
    async fn range_get(&self, url: &str, start: u64, end: u64) -> Result<ByteStream> {
        if start >= end {
            return Err(CirrusError::InvalidRange { start, end, len: end });
        }

        let request = self
            .client
            .get(url)
            .header(ACCEPT, "*/*")
            .header(RANGE, range_header(start, end))
            .send();
        let response = tokio::time::timeout(self.timeout, request)
            .await
            .map_err(|_| {
                CirrusError::Transport(format!("no response from {} within {:?}", url, self.timeout))
            })?
            .map_err(map_reqwest_error)?;
        let response = check_status(response)?;

        let content_range = response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v| v.to_str().ok());
        if let Err(e) = check_range(response.status(), content_range, start, url) {
            warn!(url = %url, start, end, error = %e, "Range not honored");
            return Err(e);
        }

        let body = response.bytes_stream().map_err(map_reqwest_error);
        Ok(guarded_body(body, self.timeout, end - start))
    }

    async fn get(&self, url: &str) -> Result<Bytes> {
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "*/*")
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        check_status(response)?
            .bytes()
            .await
            .map_err(map_reqwest_error)
    }
}

/// Token provider for a pre-issued access token
#[derive(Debug, Default)]
pub struct StaticToken {
    token: RwLock<Option<String>>,
    initial: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        let token = token.into();
        Self {
            token: RwLock::new(Some(token.clone())),
            initial: token,
        }
    }
}

#[async_trait]
impl TokenProvider for StaticToken {
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.token.read().clone() {
            return Ok(token);
        }
        // Nothing to refresh from: reissue the configured token
        let token = self.initial.clone();
        *self.token.write() = Some(token.clone());
        Ok(token)
    }

    fn expire_token(&self) {
        self.token.write().take();
    }
}

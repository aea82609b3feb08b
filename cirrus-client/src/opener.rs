//! Opening ranged downloads
//!
//! `ShardOpener` turns "bytes `[start, end)` of this part" into an open
//! response body: it picks an endpoint per attempt, builds the object URL,
//! and retries transient failures. The returned `OpenedRange` owns the
//! endpoint allocation until it is dropped.

use crate::shard::{ShardAllocation, ShardManager};
use crate::transport::{ByteStream, RangeFetcher, ShardClass, TokenProvider};
use async_trait::async_trait;
use bytes::Bytes;
use cirrus_core::error::{CirrusError, Result};
use cirrus_core::file::PhysicalPart;
use cirrus_core::retry::{retry, RetryPolicy};
use parking_lot::Mutex;
use reqwest::Url;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};

/// Source of ranged response bodies for physical parts
#[async_trait]
pub trait RangeOpener: Send + Sync {
    /// Open bytes `[start, end)` of `part`, offsets local to the part
    async fn open(&self, part: &PhysicalPart, start: u64, end: u64) -> Result<OpenedRange>;
}

/// Endpoint held by an open response, released with latency logged on drop
struct Lease {
    allocation: ShardAllocation,
    url: String,
    started: Instant,
}

impl Drop for Lease {
    fn drop(&mut self) {
        debug!(
            url = %self.url,
            shard = %self.allocation.url(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "HTTP GET finished"
        );
    }
}

/// An open response body
pub struct OpenedRange {
    body: ByteStream,
    _lease: Option<Lease>,
}

impl OpenedRange {
    /// A body that holds no endpoint allocation
    pub fn new(body: ByteStream) -> Self {
        Self { body, _lease: None }
    }

    fn leased(body: ByteStream, allocation: ShardAllocation, url: String, started: Instant) -> Self {
        Self {
            body,
            _lease: Some(Lease {
                allocation,
                url,
                started,
            }),
        }
    }

    pub fn body_mut(&mut self) -> &mut ByteStream {
        &mut self.body
    }
}

impl std::fmt::Debug for OpenedRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenedRange")
            .field("leased", &self._lease.is_some())
            .finish()
    }
}

/// `RangeOpener` backed by the shard manager and a fetcher
pub struct ShardOpener {
    shards: Arc<ShardManager>,
    fetcher: Arc<dyn RangeFetcher>,
    tokens: Arc<dyn TokenProvider>,
    client_id: String,
    policy: RetryPolicy,
}

impl ShardOpener {
    pub fn new(
        shards: Arc<ShardManager>,
        fetcher: Arc<dyn RangeFetcher>,
        tokens: Arc<dyn TokenProvider>,
        client_id: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            shards,
            fetcher,
            tokens,
            client_id: client_id.into(),
            policy,
        }
    }

    pub fn shards(&self) -> &Arc<ShardManager> {
        &self.shards
    }

    /// Fetch a small object whole, through the same shard class its
    /// data reads would use
    #[instrument(skip(self, part), fields(path = %part.path))]
    pub async fn fetch_object(&self, part: &PhysicalPart) -> Result<Bytes> {
        let class = shard_class_for(part);
        let last_cursor = &Mutex::new(None);
        let this = self;

        let result = retry(
            self.policy,
            move |_| async move {
                let previous = *last_cursor.lock();
                let allocation = this.shards.next(class, previous).await?;
                *last_cursor.lock() = Some(allocation.cursor());

                let token = this.tokens.access_token().await?;
                let url = object_url(allocation.url(), part, &this.client_id, &token)?;
                debug!(url = %url, "HTTP GET");
                this.fetcher.get(url.as_str()).await.map_err(|e| {
                    this.on_failure(&allocation, url.as_str(), &e);
                    e
                })
            },
            CirrusError::is_not_found,
            |e, attempt| warn!(path = %part.path, attempt, error = %e, "Retrying object fetch"),
        )
        .await;

        result.map_err(|e| self.exhausted(e, &part.path))
    }

    fn on_failure(&self, allocation: &ShardAllocation, url: &str, err: &CirrusError) {
        if err.is_server_fault() {
            self.shards.ban(allocation.url());
        }
        warn!(url = %url, error = %err, "HTTP GET failed");
    }

    fn exhausted(&self, err: CirrusError, path: &str) -> CirrusError {
        match err {
            CirrusError::NotFound(_) | CirrusError::Transport(_) => err,
            other => CirrusError::Transport(format!(
                "{} failed after {} attempts: {}",
                path, self.policy.max_attempts, other
            )),
        }
    }
}

#[async_trait]
impl RangeOpener for ShardOpener {
    async fn open(&self, part: &PhysicalPart, start: u64, end: u64) -> Result<OpenedRange> {
        let class = shard_class_for(part);
        let last_cursor = &Mutex::new(None);
        let this = self;

        let result = retry(
            self.policy,
            move |_| async move {
                let previous = *last_cursor.lock();
                let allocation = this.shards.next(class, previous).await?;
                *last_cursor.lock() = Some(allocation.cursor());

                let token = this.tokens.access_token().await?;
                let url = object_url(allocation.url(), part, &this.client_id, &token)?;
                debug!(url = %url, start, end, "HTTP GET range");

                let started = Instant::now();
                match this.fetcher.range_get(url.as_str(), start, end).await {
                    Ok(body) => Ok(OpenedRange::leased(body, allocation, url.to_string(), started)),
                    Err(e) => {
                        this.on_failure(&allocation, url.as_str(), &e);
                        Err(e)
                    }
                }
            },
            CirrusError::is_not_found,
            |e, attempt| {
                warn!(path = %part.path, start, end, attempt, error = %e, "Retrying range request")
            },
        )
        .await;

        result.map_err(|e| self.exhausted(e, &part.path))
    }
}

/// Published parts are served by weblink shards
pub fn shard_class_for(part: &PhysicalPart) -> ShardClass {
    if part.public_link.is_some() {
        ShardClass::WeblinkDownload
    } else {
        ShardClass::Download
    }
}

/// URL of `part` on the endpoint `shard`.
///
/// Published parts are addressed by public link, everything else by the
/// escaped remote path. Both carry `client_id` and `token`.
pub fn object_url(shard: &str, part: &PhysicalPart, client_id: &str, token: &str) -> Result<Url> {
    let mut url = match &part.public_link {
        Some(link) => Url::parse(&format!("{}{}", shard, link)),
        None => Url::parse(shard),
    }
    .map_err(|e| CirrusError::Configuration(format!("bad shard url {}: {}", shard, e)))?;

    if part.public_link.is_none() {
        let escaped = part.path.trim_start_matches('/');
        url.path_segments_mut()
            .map_err(|_| CirrusError::Configuration(format!("shard url {} cannot be a base", shard)))?
            .pop_if_empty()
            .push(escaped);
    }

    url.query_pairs_mut()
        .append_pair("client_id", client_id)
        .append_pair("token", token);
    Ok(url)
}

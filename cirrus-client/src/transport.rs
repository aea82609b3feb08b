//! Transport seams
//!
//! The read path talks to the outside world only through these traits:
//! shard discovery, access tokens and ranged object fetches. `crate::http`
//! implements them over HTTP; tests plug in an in-memory store.

use async_trait::async_trait;
use bytes::Bytes;
use cirrus_core::error::Result;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::pin::Pin;

/// Body of a ranged response
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// Category of remote operation a shard serves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardClass {
    Download,
    WeblinkDownload,
    Upload,
    Metadata,
    WeblinkVideo,
}

impl ShardClass {
    pub const ALL: [ShardClass; 5] = [
        ShardClass::Download,
        ShardClass::WeblinkDownload,
        ShardClass::Upload,
        ShardClass::Metadata,
        ShardClass::WeblinkVideo,
    ];

    /// Dispatcher path segment for this class
    pub fn dispatcher_key(self) -> &'static str {
        match self {
            ShardClass::Download => "get",
            ShardClass::WeblinkDownload => "weblink_get",
            ShardClass::Upload => "upload",
            ShardClass::Metadata => "metadata",
            ShardClass::WeblinkVideo => "weblink_video",
        }
    }

    /// Position in per-class tables
    pub(crate) fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for ShardClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.dispatcher_key())
    }
}

impl std::str::FromStr for ShardClass {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ShardClass::ALL
            .into_iter()
            .find(|class| class.dispatcher_key() == s)
            .ok_or_else(|| format!("unknown shard class: {}", s))
    }
}

/// Source of shard endpoints per operation class
#[async_trait]
pub trait ShardDiscovery: Send + Sync {
    /// Current endpoint URLs for `class`, in dispatcher order
    async fn discover_shards(&self, class: ShardClass) -> Result<Vec<String>>;
}

/// Access tokens for download requests
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn access_token(&self) -> Result<String>;

    /// Forget the current token; the next `access_token` fetches a new one
    fn expire_token(&self);
}

/// Object fetches against a shard endpoint
#[async_trait]
pub trait RangeFetcher: Send + Sync {
    /// Stream bytes `[start, end)` of the object at `url`
    async fn range_get(&self, url: &str, start: u64, end: u64) -> Result<ByteStream>;

    /// Fetch a small object whole
    async fn get(&self, url: &str) -> Result<Bytes>;
}

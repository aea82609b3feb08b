//! In-memory cloud for integration tests
//!
//! Implements the transport seams over a map of objects, with scripted
//! faults and a request log.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use cirrus_client::{
    ByteStream, ClientConfig, CloudClient, RangeFetcher, ShardClass, ShardDiscovery,
    TokenProvider,
};
use cirrus_core::crypto::{sector_padding, EncryptionKey, XtsCipher};
use cirrus_core::error::{CirrusError, Result};
use cirrus_core::retry::RetryPolicy;
use cirrus_core::LogicalFile;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub const SHARD_A: &str = "https://shard-a.test/get/";
pub const SHARD_B: &str = "https://shard-b.test/get/";
pub const WEBLINK_SHARD: &str = "https://weblink.test/view/";
pub const VIDEO_SHARD: &str = "https://video.test/";

/// Scripted failure for the next matching request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    NotFound,
    Server(u16),
    /// Connection-level failure (reset, refused, timeout)
    Transient,
    /// Serve only the first `n` bytes of the window
    Truncate(usize),
}

/// One request seen by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub shard: String,
    pub key: String,
    pub range: Option<(u64, u64)>,
}

pub struct MemoryCloud {
    shards: RwLock<HashMap<ShardClass, Vec<String>>>,
    objects: RwLock<HashMap<String, Bytes>>,
    faults: Mutex<VecDeque<Fault>>,
    broken: RwLock<HashSet<String>>,
    requests: Mutex<Vec<Request>>,
    chunk_size: usize,
    pub discover_calls: AtomicU32,
    pub token_expiries: AtomicU32,
}

impl MemoryCloud {
    pub fn new() -> Arc<Self> {
        Self::with_chunk_size(64)
    }

    /// Bodies are delivered in chunks of `chunk_size` bytes
    pub fn with_chunk_size(chunk_size: usize) -> Arc<Self> {
        let mut shards = HashMap::new();
        shards.insert(
            ShardClass::Download,
            vec![SHARD_A.to_string(), SHARD_B.to_string()],
        );
        shards.insert(ShardClass::WeblinkDownload, vec![WEBLINK_SHARD.to_string()]);
        shards.insert(ShardClass::WeblinkVideo, vec![VIDEO_SHARD.to_string()]);

        Arc::new(Self {
            shards: RwLock::new(shards),
            objects: RwLock::new(HashMap::new()),
            faults: Mutex::new(VecDeque::new()),
            broken: RwLock::new(HashSet::new()),
            requests: Mutex::new(Vec::new()),
            chunk_size: chunk_size.max(1),
            discover_calls: AtomicU32::new(0),
            token_expiries: AtomicU32::new(0),
        })
    }

    pub fn set_shards(&self, class: ShardClass, urls: &[&str]) {
        self.shards
            .write()
            .insert(class, urls.iter().map(|u| u.to_string()).collect());
    }

    /// Store an object under a remote path
    pub fn put(&self, path: &str, data: impl Into<Bytes>) {
        self.objects.write().insert(path.to_string(), data.into());
    }

    /// Store an object reachable by public link
    pub fn put_public(&self, link: &str, data: impl Into<Bytes>) {
        self.objects
            .write()
            .insert(format!("link:{}", link), data.into());
    }

    /// Fail the next request with `fault`
    pub fn fail_next(&self, fault: Fault) {
        self.faults.lock().push_back(fault);
    }

    /// Every request to `shard` answers 503
    pub fn break_shard(&self, shard: &str) {
        self.broken.write().insert(shard.to_string());
    }

    pub fn requests(&self) -> Vec<Request> {
        self.requests.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().clear();
    }

    /// Split a download URL into (shard, object key)
    fn resolve(&self, url: &str) -> Result<(String, String)> {
        let base = url.split('?').next().unwrap_or(url);
        let shards = self.shards.read();
        for urls in shards.values() {
            for shard in urls {
                if let Some(rest) = base.strip_prefix(shard.as_str()) {
                    let key = if shard == WEBLINK_SHARD {
                        format!("link:{}", rest)
                    } else {
                        format!("/{}", percent_decode(rest))
                    };
                    return Ok((shard.clone(), key));
                }
            }
        }
        Err(CirrusError::Transport(format!("connection refused: {}", url)))
    }

    fn serve(&self, url: &str, range: Option<(u64, u64)>) -> Result<(Bytes, Option<usize>)> {
        let (shard, key) = self.resolve(url)?;
        self.requests.lock().push(Request {
            shard: shard.clone(),
            key: key.clone(),
            range,
        });

        if self.broken.read().contains(&shard) {
            return Err(CirrusError::Server {
                status: 503,
                url: url.to_string(),
            });
        }

        let mut truncate = None;
        if let Some(fault) = self.faults.lock().pop_front() {
            match fault {
                Fault::NotFound => return Err(CirrusError::NotFound(url.to_string())),
                Fault::Server(status) => {
                    return Err(CirrusError::Server {
                        status,
                        url: url.to_string(),
                    })
                }
                Fault::Transient => {
                    return Err(CirrusError::Transport(format!("connection reset: {}", url)))
                }
                Fault::Truncate(n) => truncate = Some(n),
            }
        }

        let data = self
            .objects
            .read()
            .get(&key)
            .cloned()
            .ok_or_else(|| CirrusError::NotFound(url.to_string()))?;

        let data = match range {
            Some((start, end)) => {
                if end as usize > data.len() || start >= end {
                    return Err(CirrusError::Transport(format!(
                        "HTTP 416 for {}..{} of {}",
                        start,
                        end,
                        data.len()
                    )));
                }
                data.slice(start as usize..end as usize)
            }
            None => data,
        };
        Ok((data, truncate))
    }
}

#[async_trait]
impl ShardDiscovery for MemoryCloud {
    async fn discover_shards(&self, class: ShardClass) -> Result<Vec<String>> {
        self.discover_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.shards.read().get(&class).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl TokenProvider for MemoryCloud {
    async fn access_token(&self) -> Result<String> {
        Ok(format!("token-{}", self.token_expiries.load(Ordering::SeqCst)))
    }

    fn expire_token(&self) {
        self.token_expiries.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl RangeFetcher for MemoryCloud {
    async fn range_get(&self, url: &str, start: u64, end: u64) -> Result<ByteStream> {
        let (data, truncate) = self.serve(url, Some((start, end)))?;
        let data = match truncate {
            Some(n) => data.slice(..n.min(data.len())),
            None => data,
        };
        let chunks: Vec<Result<Bytes>> = data
            .chunks(self.chunk_size)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        Ok(Box::pin(futures::stream::iter(chunks)))
    }

    async fn get(&self, url: &str) -> Result<Bytes> {
        self.serve(url, None).map(|(data, _)| data)
    }
}

fn percent_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).unwrap();
            out.push(u8::from_str_radix(hex, 16).unwrap());
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).unwrap()
}

/// Config with fast retries and polling
pub fn test_config() -> ClientConfig {
    ClientConfig::new("http://dispatcher.test")
        .with_client_id("tests")
        .with_download_retry(RetryPolicy::new(2, Duration::from_millis(1)))
        .with_shard_polling(3, Duration::ZERO)
}

pub fn client(cloud: &Arc<MemoryCloud>) -> CloudClient {
    client_with(cloud, test_config())
}

pub fn client_with(cloud: &Arc<MemoryCloud>, config: ClientConfig) -> CloudClient {
    CloudClient::new(config, cloud.clone(), cloud.clone(), cloud.clone())
}

/// Deterministic test payload
pub fn payload(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed) ^ (i >> 8) as u8)
        .collect()
}

/// Cipher built from raw keys (no password derivation)
pub fn raw_cipher(seed: u8) -> XtsCipher {
    XtsCipher::new(
        &EncryptionKey::from_bytes([seed; 32]),
        &EncryptionKey::from_bytes([seed.wrapping_add(1); 32]),
    )
}

/// Pad and encrypt `plain` from sector 0, returning ciphertext and padding
pub fn encrypt_padded(cipher: &XtsCipher, plain: &[u8]) -> (Vec<u8>, u32) {
    let padding = sector_padding(plain.len() as u64);
    let mut data = plain.to_vec();
    data.resize(plain.len() + padding as usize, 0);
    cipher.encrypt_area(0, &mut data).unwrap();
    (data, padding)
}

/// Store `data` as a file split into parts of the given sizes
pub fn store_split(cloud: &MemoryCloud, path: &str, data: &[u8], part_sizes: &[u64]) -> LogicalFile {
    assert_eq!(part_sizes.iter().sum::<u64>(), data.len() as u64);
    let file = LogicalFile::split(path, part_sizes, "").unwrap();
    let mut offset = 0usize;
    for part in file.parts() {
        let len = part.size as usize;
        cloud.put(&part.path, data[offset..offset + len].to_vec());
        offset += len;
    }
    file
}

//! Cloud client
//!
//! Entry point of the read path. Wires the shard manager, opener and
//! transports together and hands out streams for logical files.

use crate::config::ClientConfig;
use crate::opener::{RangeOpener, ShardOpener};
use crate::shard::ShardManager;
use crate::stream::{CryptoReadStream, RangeReadStream, ReadStream};
use crate::transport::{RangeFetcher, ShardClass, ShardDiscovery, TokenProvider};
use cirrus_core::crypto::XtsCipher;
use cirrus_core::error::{CirrusError, Result};
use cirrus_core::file::{video_playlist_url, LogicalFile};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Read-only client for a sharded object store
pub struct CloudClient {
    config: ClientConfig,
    shards: Arc<ShardManager>,
    opener: Arc<ShardOpener>,
    crypt_password: Option<String>,
}

impl CloudClient {
    pub fn new(
        config: ClientConfig,
        discovery: Arc<dyn ShardDiscovery>,
        tokens: Arc<dyn TokenProvider>,
        fetcher: Arc<dyn RangeFetcher>,
    ) -> Self {
        let shards = Arc::new(ShardManager::new(&config, discovery, Arc::clone(&tokens)));
        let opener = Arc::new(ShardOpener::new(
            Arc::clone(&shards),
            fetcher,
            tokens,
            config.client_id.clone(),
            config.download_retry,
        ));

        info!(dispatcher = %config.dispatcher_url, "Cloud client ready");

        Self {
            config,
            shards,
            opener,
            crypt_password: None,
        }
    }

    /// Password used to derive data keys of encrypted files
    pub fn with_crypt_password(mut self, password: impl Into<String>) -> Self {
        self.crypt_password = Some(password.into());
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn shards(&self) -> &Arc<ShardManager> {
        &self.shards
    }

    pub fn opener(&self) -> Arc<dyn RangeOpener> {
        Arc::clone(&self.opener) as Arc<dyn RangeOpener>
    }

    /// Open a stream over logical bytes `[start, end)` of `file`.
    ///
    /// Encrypted files get a decrypting stream; the crypto header and the
    /// cipher are resolved on first use and shared by every later stream of
    /// the same file. Plain files get a ranged stream directly.
    #[instrument(skip(self, file), fields(path = %file.full_path()))]
    pub async fn open_stream(
        &self,
        file: &LogicalFile,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Box<dyn ReadStream>> {
        if file.is_encrypted() {
            let cipher = self.cipher_for(file).await?;
            let stream = CryptoReadStream::new(self.opener(), file.clone(), cipher, start, end)?;
            return Ok(Box::new(stream));
        }

        let stream = RangeReadStream::new(self.opener(), file.clone(), start, end)?;
        Ok(Box::new(stream))
    }

    /// Read logical bytes `[start, end)` of `file` into memory
    pub async fn read_range(
        &self,
        file: &LogicalFile,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Vec<u8>> {
        let mut stream = self.open_stream(file, start, end).await?;
        stream.read_to_end().await
    }

    /// Cipher for an encrypted file, memoized on its crypto metadata
    async fn cipher_for(&self, file: &LogicalFile) -> Result<Arc<XtsCipher>> {
        let crypto = file.crypto().ok_or_else(|| {
            CirrusError::CryptoHeader(format!("{} is not encrypted", file.full_path()))
        })?;
        let header = file.crypto_header_part().ok_or_else(|| {
            CirrusError::CryptoHeader(format!("{} has no crypto header", file.full_path()))
        })?;

        let opener = &self.opener;
        let header = &header;
        let public = crypto
            .resolve_public(|| async move {
                debug!(path = %header.path, "Fetching crypto header");
                opener.fetch_object(header).await
            })
            .await?
            .clone();

        let password = self.crypt_password.clone().ok_or_else(|| {
            CirrusError::Configuration("crypt password is required for encrypted files".into())
        })?;

        crypto
            .resolve_cipher(|| async move {
                tokio::task::spawn_blocking(move || {
                    XtsCipher::for_file(password.as_bytes(), &public)
                })
                .await
                .map_err(|e| CirrusError::Internal(format!("key derivation task failed: {}", e)))?
            })
            .await
    }

    /// Endpoint currently chosen for one-off requests of `class`
    pub async fn shard_info(&self, class: ShardClass) -> Result<String> {
        self.shards.shard_info(class).await
    }

    /// Streaming playlist link for a published video
    pub async fn video_url(&self, file: &LogicalFile) -> Result<Option<String>> {
        let Some(link) = file.public_link() else {
            return Ok(None);
        };
        let shard = self.shards.shard_info(ShardClass::WeblinkVideo).await?;
        Ok(Some(video_playlist_url(&shard, link)))
    }
}

impl std::fmt::Debug for CloudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudClient")
            .field("config", &self.config)
            .field("shards", &self.shards)
            .field("crypt_password", &self.crypt_password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

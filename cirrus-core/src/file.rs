//! Logical file model
//!
//! A `LogicalFile` is the user-visible file. Its bytes live in one or more
//! stored objects (`PhysicalPart`), concatenated in ordinal order. An
//! encrypted file additionally carries `CryptoInfo`: the sector padding added
//! to the last part and the lazily fetched key material.
//!
//! Values are snapshots. Relocating a file produces or mutates an owned value;
//! the shared `CryptoInfo` memo is never rewritten.

use crate::crypto::{CryptoPublicInfo, XtsCipher, SECTOR_SIZE};
use crate::error::{CirrusError, Result};
use crate::path;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::OnceCell;

/// Marker between a logical name and a part/header suffix
pub const SERVICE_MARKER: &str = ".wdmrc.";

/// Suffix of the crypto header object
pub const CRYPT_HEADER_SUFFIX: &str = ".wdmrc.crypt";

/// Deterministic name suffix of part `ordinal` of a multi-part file
pub fn part_suffix(ordinal: usize) -> String {
    format!("{}{:03}", SERVICE_MARKER, ordinal)
}

/// Timestamp used when the remote store reports none
pub fn min_file_date() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0)
        .single()
        .unwrap_or_default()
}

/// One stored object backing a segment of a logical file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhysicalPart {
    /// Remote path of the stored object
    pub path: String,
    /// Stored length in bytes
    pub size: u64,
    /// Position within the logical file
    pub ordinal: usize,
    /// Public link of this object, when published
    #[serde(default)]
    pub public_link: Option<String>,
}

/// Per-file encryption parameters
#[derive(Debug)]
pub struct CryptoInfo {
    align_bytes: u32,
    public: OnceCell<CryptoPublicInfo>,
    cipher: OnceCell<Arc<XtsCipher>>,
}

impl CryptoInfo {
    pub fn new(align_bytes: u32) -> Result<Self> {
        if align_bytes as usize >= SECTOR_SIZE {
            return Err(CirrusError::CryptoHeader(format!(
                "alignment padding {} must be below the sector size {}",
                align_bytes, SECTOR_SIZE
            )));
        }
        Ok(Self {
            align_bytes,
            public: OnceCell::new(),
            cipher: OnceCell::new(),
        })
    }

    /// Bytes of padding appended to the last part
    pub fn align_bytes(&self) -> u32 {
        self.align_bytes
    }

    /// Header contents, if already resolved
    pub fn public_info(&self) -> Option<&CryptoPublicInfo> {
        self.public.get()
    }

    /// Resolve the header once; later calls return the memoized value
    /// without invoking `fetch`.
    pub async fn resolve_public<F, Fut>(&self, fetch: F) -> Result<&CryptoPublicInfo>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<bytes::Bytes>>,
    {
        self.public
            .get_or_try_init(|| async move {
                let raw = fetch().await?;
                CryptoPublicInfo::from_json(&raw)
            })
            .await
    }

    /// Resolve the cipher once; later calls share the memoized instance
    pub async fn resolve_cipher<F, Fut>(&self, init: F) -> Result<Arc<XtsCipher>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<XtsCipher>>,
    {
        self.cipher
            .get_or_try_init(|| async move { init().await.map(Arc::new) })
            .await
            .cloned()
    }
}

/// The user-visible file
#[derive(Debug, Clone)]
pub struct LogicalFile {
    full_path: String,
    parts: Vec<PhysicalPart>,
    hash: String,
    crypto: Option<Arc<CryptoInfo>>,
    public_link: Option<String>,
    header_link: Option<String>,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
}

impl LogicalFile {
    /// A plain file stored as one object at its own path
    pub fn new(full_path: &str, size: u64, hash: impl Into<String>) -> Self {
        let full_path = path::clean(full_path);
        Self {
            parts: vec![PhysicalPart {
                path: full_path.clone(),
                size,
                ordinal: 0,
                public_link: None,
            }],
            full_path,
            hash: hash.into(),
            crypto: None,
            public_link: None,
            header_link: None,
            created: min_file_date(),
            modified: min_file_date(),
            accessed: min_file_date(),
        }
    }

    /// A file stored as several objects, part `i` at `full_path + part_suffix(i)`
    pub fn split(full_path: &str, part_sizes: &[u64], hash: impl Into<String>) -> Result<Self> {
        if part_sizes.is_empty() {
            return Err(CirrusError::Internal(format!(
                "{} has no physical parts",
                full_path
            )));
        }
        let mut file = Self::new(full_path, 0, hash);
        file.parts = part_sizes
            .iter()
            .enumerate()
            .map(|(ordinal, &size)| PhysicalPart {
                path: String::new(),
                size,
                ordinal,
                public_link: None,
            })
            .collect();
        file.relocate_parts();
        Ok(file)
    }

    /// Mark as encrypted with `align_bytes` of sector padding on the last part
    pub fn with_encryption(mut self, align_bytes: u32) -> Result<Self> {
        let info = CryptoInfo::new(align_bytes)?;
        let physical = self.physical_size();
        if physical % SECTOR_SIZE as u64 != 0 {
            return Err(CirrusError::CryptoHeader(format!(
                "encrypted payload of {} bytes is not a whole number of sectors",
                physical
            )));
        }
        if u64::from(align_bytes) > physical {
            return Err(CirrusError::CryptoHeader(format!(
                "alignment padding {} exceeds payload of {} bytes",
                align_bytes, physical
            )));
        }
        self.crypto = Some(Arc::new(info));
        Ok(self)
    }

    /// Set the public link. A single-part file shares it with its part.
    pub fn with_public_link(mut self, link: impl Into<String>) -> Self {
        let link = link.into();
        if let [part] = self.parts.as_mut_slice() {
            part.public_link = Some(link.clone());
        }
        self.public_link = Some(link);
        self
    }

    /// Public link of the crypto header object
    pub fn with_header_link(mut self, link: impl Into<String>) -> Self {
        self.header_link = Some(link.into());
        self
    }

    /// Set per-part public links (by ordinal)
    pub fn with_part_links(mut self, links: Vec<Option<String>>) -> Self {
        for (part, link) in self.parts.iter_mut().zip(links) {
            part.public_link = link;
        }
        self
    }

    pub fn with_times(
        mut self,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
        accessed: DateTime<Utc>,
    ) -> Self {
        self.created = created;
        self.modified = modified;
        self.accessed = accessed;
        self
    }

    pub fn full_path(&self) -> &str {
        &self.full_path
    }

    /// File name (last path segment)
    pub fn name(&self) -> String {
        path::name(&self.full_path)
    }

    /// Directory containing the file
    pub fn dir(&self) -> String {
        path::parent(&self.full_path)
    }

    /// Extension including the dot, empty when there is none
    pub fn extension(&self) -> String {
        let name = self.name();
        match name.rfind('.') {
            Some(idx) if idx > 0 => name[idx..].to_string(),
            _ => String::new(),
        }
    }

    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn public_link(&self) -> Option<&str> {
        self.public_link.as_deref()
    }

    pub fn parts(&self) -> &[PhysicalPart] {
        &self.parts
    }

    pub fn is_split(&self) -> bool {
        self.parts.len() > 1
    }

    pub fn crypto(&self) -> Option<&Arc<CryptoInfo>> {
        self.crypto.as_ref()
    }

    pub fn is_encrypted(&self) -> bool {
        self.crypto.is_some()
    }

    /// Sum of the stored part lengths
    pub fn physical_size(&self) -> u64 {
        self.parts.iter().map(|p| p.size).sum()
    }

    /// Size visible to callers: physical size minus the sector padding
    pub fn size(&self) -> u64 {
        let padding = self
            .crypto
            .as_ref()
            .map(|c| u64::from(c.align_bytes()))
            .unwrap_or(0);
        self.physical_size().saturating_sub(padding)
    }

    /// Remote path of the crypto header, for encrypted files
    pub fn crypto_header_path(&self) -> Option<String> {
        self.crypto
            .as_ref()
            .map(|_| format!("{}{}", self.full_path, CRYPT_HEADER_SUFFIX))
    }

    /// The crypto header as a stored object, addressed by its public link
    /// when the file was published with one.
    pub fn crypto_header_part(&self) -> Option<PhysicalPart> {
        self.crypto_header_path().map(|path| PhysicalPart {
            path,
            size: 0,
            ordinal: 0,
            public_link: self.header_link.clone(),
        })
    }

    /// Locate a physical offset: index of the containing part and the
    /// physical offset at which that part starts.
    pub fn part_at(&self, offset: u64) -> Option<(usize, u64)> {
        let mut start = 0u64;
        for (idx, part) in self.parts.iter().enumerate() {
            if offset < start + part.size {
                return Some((idx, start));
            }
            start += part.size;
        }
        None
    }

    /// Copy of this file at `new_path`, keeping size, hash, timestamps,
    /// public link, part layout and crypto metadata.
    pub fn with_path(&self, new_path: &str) -> Self {
        let mut file = self.clone();
        file.full_path = path::clean(new_path);
        file.relocate_parts();
        file
    }

    /// Rename within the current directory
    pub fn set_name(&mut self, new_name: &str) {
        self.full_path = path::combine(&self.dir(), new_name);
        self.relocate_parts();
    }

    /// Move to another directory, keeping the name
    pub fn set_path(&mut self, new_dir: &str) {
        self.full_path = path::combine(new_dir, &self.name());
        self.relocate_parts();
    }

    fn relocate_parts(&mut self) {
        if let [part] = self.parts.as_mut_slice() {
            part.path = self.full_path.clone();
            return;
        }
        for part in &mut self.parts {
            part.path = format!("{}{}", self.full_path, part_suffix(part.ordinal));
        }
    }

    /// Public URLs of every published part
    pub fn publish_info(&self, link_base: &str) -> Vec<PublishItem> {
        self.parts
            .iter()
            .filter_map(|part| {
                part.public_link.as_ref().map(|link| PublishItem {
                    path: part.path.clone(),
                    url: format!("{}{}", link_base, link),
                })
            })
            .collect()
    }
}

/// One published object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishItem {
    pub path: String,
    pub url: String,
}

/// Streaming playlist URL for a published video, served by a video shard
pub fn video_playlist_url(shard_url: &str, public_link: &str) -> String {
    use base64::Engine;
    let encoded = base64::engine::general_purpose::STANDARD
        .encode(public_link.trim_start_matches('/').as_bytes());
    format!("{}0p/{}.m3u8?double_encode=1", shard_url, encoded)
}

/// Serializable description of a logical file, as produced by a metadata lookup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileManifest {
    pub path: String,
    #[serde(default)]
    pub hash: String,
    pub parts: Vec<PartManifest>,
    /// Present only for encrypted files
    #[serde(default)]
    pub align_bytes: Option<u32>,
    #[serde(default)]
    pub public_link: Option<String>,
    /// Public link of the crypto header, for published encrypted files
    #[serde(default)]
    pub header_public_link: Option<String>,
    #[serde(default)]
    pub created: Option<DateTime<Utc>>,
    #[serde(default)]
    pub modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartManifest {
    pub size: u64,
    #[serde(default)]
    pub public_link: Option<String>,
}

impl TryFrom<FileManifest> for LogicalFile {
    type Error = CirrusError;

    fn try_from(manifest: FileManifest) -> Result<Self> {
        let sizes: Vec<u64> = manifest.parts.iter().map(|p| p.size).collect();
        let mut file = LogicalFile::split(&manifest.path, &sizes, manifest.hash)?;

        if let Some(link) = manifest.public_link {
            file = file.with_public_link(link);
        }
        if file.is_split() {
            file = file.with_part_links(
                manifest.parts.into_iter().map(|p| p.public_link).collect(),
            );
        }
        if let Some(align) = manifest.align_bytes {
            file = file.with_encryption(align)?;
            if let Some(link) = manifest.header_public_link {
                file = file.with_header_link(link);
            }
        }

        let created = manifest.created.unwrap_or_else(min_file_date);
        let modified = manifest.modified.unwrap_or(created);
        Ok(file.with_times(created, modified, modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn stamp(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn test_plain_file() {
        let file = LogicalFile::new("/docs/a.txt", 100, "h1");
        assert_eq!(file.size(), 100);
        assert_eq!(file.physical_size(), 100);
        assert_eq!(file.parts().len(), 1);
        assert_eq!(file.parts()[0].path, "/docs/a.txt");
        assert_eq!(file.name(), "a.txt");
        assert_eq!(file.dir(), "/docs");
        assert_eq!(file.extension(), ".txt");
        assert!(!file.is_encrypted());
        assert_eq!(file.crypto_header_path(), None);
    }

    #[test]
    fn test_encrypted_size_subtracts_padding() {
        let file = LogicalFile::new("/a.bin", 1024, "h")
            .with_encryption(9)
            .unwrap();
        assert_eq!(file.physical_size(), 1024);
        assert_eq!(file.size(), 1015);
        assert_eq!(
            file.crypto_header_path().as_deref(),
            Some("/a.bin.wdmrc.crypt")
        );
    }

    #[test]
    fn test_encryption_validation() {
        // Not a sector multiple
        assert!(LogicalFile::new("/a", 1000, "").with_encryption(0).is_err());
        // Padding must stay below one sector
        assert!(LogicalFile::new("/a", 1024, "").with_encryption(512).is_err());
        // Empty encrypted payload with no padding is allowed
        assert!(LogicalFile::new("/a", 0, "").with_encryption(0).is_ok());
    }

    #[test]
    fn test_split_layout() {
        let file = LogicalFile::split("/v/movie.mkv", &[100, 100, 50], "h").unwrap();
        assert_eq!(file.size(), 250);
        let paths: Vec<&str> = file.parts().iter().map(|p| p.path.as_str()).collect();
        assert_eq!(
            paths,
            vec![
                "/v/movie.mkv.wdmrc.000",
                "/v/movie.mkv.wdmrc.001",
                "/v/movie.mkv.wdmrc.002"
            ]
        );
        assert!(LogicalFile::split("/x", &[], "").is_err());
    }

    #[test]
    fn test_part_at() {
        let file = LogicalFile::split("/f", &[10, 20, 5], "").unwrap();
        assert_eq!(file.part_at(0), Some((0, 0)));
        assert_eq!(file.part_at(9), Some((0, 0)));
        assert_eq!(file.part_at(10), Some((1, 10)));
        assert_eq!(file.part_at(34), Some((2, 30)));
        assert_eq!(file.part_at(35), None);
    }

    #[test]
    fn test_with_path_preserves_metadata() {
        let file = LogicalFile::new("/a/song.mp3", 4096, "abc")
            .with_encryption(100)
            .unwrap()
            .with_public_link("pub/xyz")
            .with_times(stamp(10), stamp(20), stamp(30));

        let moved = file.with_path("/b/renamed.mp3");
        assert_eq!(moved.full_path(), "/b/renamed.mp3");
        assert_eq!(moved.size(), file.size());
        assert_eq!(moved.hash(), "abc");
        assert_eq!(moved.public_link(), Some("pub/xyz"));
        assert_eq!(moved.created, stamp(10));
        assert_eq!(moved.modified, stamp(20));
        assert_eq!(moved.accessed, stamp(30));
        assert_eq!(moved.parts()[0].path, "/b/renamed.mp3");

        // Original untouched
        assert_eq!(file.full_path(), "/a/song.mp3");
        assert_eq!(file.parts()[0].path, "/a/song.mp3");
    }

    #[test]
    fn test_set_name_rewrites_every_part() {
        let mut file = LogicalFile::split("/dir/old.iso", &[512, 512, 512, 7], "").unwrap();
        file.set_name("new.iso");

        assert_eq!(file.full_path(), "/dir/new.iso");
        for (i, part) in file.parts().iter().enumerate() {
            assert_eq!(part.ordinal, i);
            assert_eq!(path::name(&part.path), format!("new.iso{}", part_suffix(i)));
            assert_eq!(path::parent(&part.path), "/dir");
        }
    }

    #[test]
    fn test_set_path_rewrites_every_part() {
        let mut file = LogicalFile::split("/dir/data.bin", &[1, 2], "").unwrap();
        file.set_path("/archive/2024");

        assert_eq!(file.full_path(), "/archive/2024/data.bin");
        assert_eq!(file.parts()[0].path, "/archive/2024/data.bin.wdmrc.000");
        assert_eq!(file.parts()[1].path, "/archive/2024/data.bin.wdmrc.001");
    }

    #[test]
    fn test_set_name_single_part() {
        let mut file = LogicalFile::new("/dir/a.txt", 3, "");
        file.set_name("b.txt");
        assert_eq!(file.parts()[0].path, "/dir/b.txt");
    }

    #[tokio::test]
    async fn test_crypto_header_resolved_once() {
        let file = LogicalFile::new("/e", 512, "").with_encryption(3).unwrap();
        let info = CryptoPublicInfo::new(vec![4u8; 16], [6u8; 32]);
        let json = Bytes::from(info.to_json().unwrap());
        let fetches = AtomicUsize::new(0);

        let crypto = file.crypto().unwrap();
        for _ in 0..3 {
            let resolved = crypto
                .resolve_public(|| {
                    fetches.fetch_add(1, Ordering::SeqCst);
                    let json = json.clone();
                    async move { Ok(json) }
                })
                .await
                .unwrap();
            assert_eq!(resolved, &info);
        }
        assert_eq!(fetches.load(Ordering::SeqCst), 1);

        // Clones and renamed copies share the memo
        let renamed = file.with_path("/f");
        assert_eq!(renamed.crypto().unwrap().public_info(), Some(&info));
    }

    #[tokio::test]
    async fn test_malformed_header_is_not_memoized() {
        let file = LogicalFile::new("/e", 512, "").with_encryption(0).unwrap();
        let crypto = file.crypto().unwrap();

        let bad = crypto
            .resolve_public(|| async { Ok(Bytes::from_static(b"{}")) })
            .await;
        assert!(matches!(bad, Err(CirrusError::CryptoHeader(_))));
        assert!(crypto.public_info().is_none());
    }

    #[test]
    fn test_publish_info() {
        let file = LogicalFile::split("/m.avi", &[1, 1], "")
            .unwrap()
            .with_part_links(vec![Some("l0".into()), None]);
        let items = file.publish_info("https://cloud/public/");
        assert_eq!(
            items,
            vec![PublishItem {
                path: "/m.avi.wdmrc.000".into(),
                url: "https://cloud/public/l0".into()
            }]
        );
    }

    #[test]
    fn test_video_playlist_url() {
        let url = video_playlist_url("https://video/", "/abc/def");
        assert_eq!(url, "https://video/0p/YWJjL2RlZg==.m3u8?double_encode=1");
    }

    #[test]
    fn test_manifest_conversion() {
        let json = r#"{
            "path": "/x/y.bin",
            "hash": "H",
            "parts": [{"size": 512}, {"size": 512, "public_link": "p1"}],
            "align_bytes": 12,
            "created": "2024-01-02T03:04:05Z"
        }"#;
        let manifest: FileManifest = serde_json::from_str(json).unwrap();
        let file = LogicalFile::try_from(manifest).unwrap();

        assert_eq!(file.size(), 1012);
        assert!(file.is_encrypted());
        assert_eq!(file.parts()[1].path, "/x/y.bin.wdmrc.001");
        assert_eq!(file.parts()[1].public_link.as_deref(), Some("p1"));
        assert_eq!(file.modified, file.created);
    }

    #[test]
    fn test_crypto_header_part_carries_public_link() {
        let plain = LogicalFile::new("/a/b.bin", 10, "h");
        assert!(plain.crypto_header_part().is_none());

        let json = r#"{
            "path": "/a/b.bin",
            "parts": [{"size": 600}],
            "align_bytes": 88,
            "public_link": "pub/data",
            "header_public_link": "pub/header"
        }"#;
        let manifest: FileManifest = serde_json::from_str(json).unwrap();
        let file = LogicalFile::try_from(manifest).unwrap();

        let header = file.crypto_header_part().unwrap();
        assert_eq!(header.path, "/a/b.bin.wdmrc.crypt");
        assert_eq!(header.public_link.as_deref(), Some("pub/header"));
        assert_eq!(file.parts()[0].public_link.as_deref(), Some("pub/data"));
    }
}

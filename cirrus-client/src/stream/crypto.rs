//! Decrypting read stream
//!
//! Maps a logical range onto the sector-aligned physical range that covers
//! it, decrypts sector by sector with each sector's absolute tweak, and
//! trims the result back to the requested bytes.

use super::range::RangeReadStream;
use super::{resolve_seek, ReadStream};
use crate::opener::RangeOpener;
use async_trait::async_trait;
use cirrus_core::crypto::{XtsCipher, BLOCK_SIZE, SECTOR_SIZE};
use cirrus_core::error::{CirrusError, Result};
use cirrus_core::file::LogicalFile;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::debug;

const SECTOR: u64 = SECTOR_SIZE as u64;
const BLOCK: u64 = BLOCK_SIZE as u64;

/// Longest forward seek served by reading through the open ciphertext stream
const MAX_FORWARD_SKIP: u64 = 1024 * 1024;

/// Physical range fetched to serve a logical range
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CryptoRange {
    pub aligned_start: u64,
    pub aligned_end: u64,
    /// Bytes dropped from the front of the decrypted range
    pub trim_start: u64,
    /// Bytes dropped from the back of the decrypted range
    pub trim_end: u64,
}

impl CryptoRange {
    /// Align logical `[start, end)` for a payload of `physical_size` bytes
    /// carrying `align_bytes` of padding.
    pub fn compute(start: u64, end: u64, physical_size: u64, align_bytes: u32) -> Self {
        let aligned_start = start / SECTOR * SECTOR;
        let mut aligned_end = if end % BLOCK == 0 {
            end
        } else {
            (end / BLOCK + 1) * BLOCK
        };
        if aligned_end == 0 {
            aligned_end = BLOCK;
        }

        let trim_end = if aligned_end == physical_size {
            u64::from(align_bytes).max(aligned_end - end)
        } else {
            aligned_end.saturating_sub(end)
        };

        Self {
            aligned_start,
            aligned_end,
            trim_start: start - aligned_start,
            trim_end,
        }
    }

    /// Bytes produced after trimming
    pub fn output_len(&self) -> u64 {
        (self.aligned_end - self.aligned_start).saturating_sub(self.trim_start + self.trim_end)
    }

    pub fn first_sector(&self) -> u64 {
        self.aligned_start / SECTOR
    }
}

/// Plaintext reader over a logical range of an encrypted file
pub struct CryptoReadStream {
    opener: Arc<dyn RangeOpener>,
    file: LogicalFile,
    cipher: Arc<XtsCipher>,
    start: u64,
    end: u64,
    /// Absolute logical read position
    position: u64,
    inner: Option<RangeReadStream>,
    /// Ciphertext of the sector being assembled
    sector: Vec<u8>,
    next_sector: u64,
    /// Decrypted bytes not yet handed out
    plain: Vec<u8>,
    /// Absolute offset of `plain[plain_pos]`
    plain_offset: u64,
    plain_pos: usize,
}

impl CryptoReadStream {
    /// Stream logical bytes `[start, end)` of `file`; `end` defaults to, and
    /// is clamped to, the logical size.
    pub fn new(
        opener: Arc<dyn RangeOpener>,
        file: LogicalFile,
        cipher: Arc<XtsCipher>,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Self> {
        let crypto = file.crypto().ok_or_else(|| {
            CirrusError::CryptoHeader(format!("{} is not encrypted", file.full_path()))
        })?;
        if file.physical_size() % SECTOR != 0 {
            return Err(CirrusError::CryptoHeader(format!(
                "{} payload is not sector aligned",
                file.full_path()
            )));
        }
        let size = file.size();
        debug!(
            path = %file.full_path(),
            size,
            align_bytes = crypto.align_bytes(),
            "Opening encrypted stream"
        );

        let end = end.unwrap_or(size).min(size);
        let start = start.unwrap_or(0);
        if start > end {
            return Err(CirrusError::InvalidRange {
                start,
                end,
                len: size,
            });
        }

        Ok(Self {
            opener,
            file,
            cipher,
            start,
            end,
            position: start,
            inner: None,
            sector: Vec::with_capacity(SECTOR_SIZE),
            next_sector: 0,
            plain: Vec::new(),
            plain_offset: 0,
            plain_pos: 0,
        })
    }

    /// Physical range that would be fetched from the current position
    pub fn current_range(&self) -> CryptoRange {
        let align = self.file.crypto().map(|c| c.align_bytes()).unwrap_or(0);
        CryptoRange::compute(self.position, self.end, self.file.physical_size(), align)
    }

    fn reset(&mut self) {
        self.inner = None;
        self.sector.clear();
        self.plain.clear();
        self.plain_pos = 0;
    }

    fn open_inner(&mut self) -> Result<()> {
        let range = self.current_range();
        let aligned_end = range.aligned_end.min(self.file.physical_size());
        self.inner = Some(RangeReadStream::new(
            Arc::clone(&self.opener),
            self.file.clone(),
            Some(range.aligned_start),
            Some(aligned_end),
        )?);
        self.next_sector = range.first_sector();
        self.plain_offset = range.aligned_start;
        Ok(())
    }

    /// Assemble and decrypt the next sector (or the final partial sector)
    async fn decrypt_next(&mut self) -> Result<()> {
        let Some(inner) = self.inner.as_mut() else {
            return Err(CirrusError::Internal("no open ciphertext stream".into()));
        };

        self.sector.resize(SECTOR_SIZE, 0);
        let mut filled = 0;
        while filled < SECTOR_SIZE {
            let n = inner.read(&mut self.sector[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        self.sector.truncate(filled);

        if filled == 0 {
            return Err(CirrusError::UnexpectedEof {
                expected: self.end - self.start,
                actual: self.position - self.start,
            });
        }
        if filled % BLOCK_SIZE != 0 {
            return Err(CirrusError::Decryption(format!(
                "sector {} ends mid-block ({} bytes)",
                self.next_sector, filled
            )));
        }

        // Sectors wholly before the read position are skipped undecrypted
        if (self.next_sector + 1) * SECTOR <= self.position {
            self.next_sector += 1;
            self.plain.clear();
            self.plain_pos = 0;
            self.plain_offset = self.next_sector * SECTOR;
            return Ok(());
        }

        self.cipher.decrypt_sector(self.next_sector, &mut self.sector)?;
        self.plain_offset = self.next_sector * SECTOR;
        self.next_sector += 1;
        std::mem::swap(&mut self.plain, &mut self.sector);
        self.plain_pos = 0;
        Ok(())
    }
}

#[async_trait]
impl ReadStream for CryptoReadStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.position >= self.end {
            return Ok(0);
        }

        loop {
            let available = self.plain.len() - self.plain_pos;
            if available > 0 {
                // Skip decrypted bytes before the read position
                let behind = self.position.saturating_sub(self.plain_offset);
                if behind > 0 {
                    let n = behind.min(available as u64) as usize;
                    self.plain_pos += n;
                    self.plain_offset += n as u64;
                    continue;
                }

                let n = buf
                    .len()
                    .min(available)
                    .min((self.end - self.position) as usize);
                buf[..n].copy_from_slice(&self.plain[self.plain_pos..self.plain_pos + n]);
                self.plain_pos += n;
                self.plain_offset += n as u64;
                self.position += n as u64;
                return Ok(n);
            }

            if self.inner.is_none() {
                self.open_inner()?;
            }
            if let Err(e) = self.decrypt_next().await {
                self.reset();
                return Err(e);
            }
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let relative = resolve_seek(pos, self.position - self.start, self.len())?;
        let target = self.start.saturating_add(relative);
        let keep_open = self.inner.is_some()
            && target >= self.position
            && target - self.position <= MAX_FORWARD_SKIP;

        self.position = target;
        if !keep_open {
            self.reset();
        }
        Ok(relative)
    }

    fn len(&self) -> u64 {
        self.end - self.start
    }

    fn position(&self) -> u64 {
        self.position - self.start
    }
}

impl std::fmt::Debug for CryptoReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoReadStream")
            .field("path", &self.file.full_path())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("position", &self.position)
            .finish()
    }
}

//! Readable, seekable views over logical files

pub mod crypto;
pub mod range;

pub use crypto::{CryptoRange, CryptoReadStream};
pub use range::RangeReadStream;

use async_trait::async_trait;
use cirrus_core::error::{CirrusError, Result};
use std::io::SeekFrom;

/// Read buffer size used by `read_to_end`
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// An async byte stream over a window of a file.
///
/// Positions are relative to the start of the window.
#[async_trait]
pub trait ReadStream: Send {
    /// Read into `buf`, returning 0 at the end of the window
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Move the read position. Takes effect on the next `read`.
    fn seek(&mut self, pos: SeekFrom) -> Result<u64>;

    /// Window length in bytes
    fn len(&self) -> u64;

    fn position(&self) -> u64;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read everything from the current position to the end of the window
    async fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let remaining = self.len().saturating_sub(self.position());
        let mut out = Vec::with_capacity(remaining.min(READ_BUFFER_SIZE as u64 * 16) as usize);
        let mut buf = vec![0u8; READ_BUFFER_SIZE];
        loop {
            let n = self.read(&mut buf).await?;
            if n == 0 {
                return Ok(out);
            }
            out.extend_from_slice(&buf[..n]);
        }
    }
}

/// Resolve a `SeekFrom` against a window of `len` bytes
pub(crate) fn resolve_seek(pos: SeekFrom, current: u64, len: u64) -> Result<u64> {
    let target = match pos {
        SeekFrom::Start(offset) => Some(offset),
        SeekFrom::Current(delta) => current.checked_add_signed(delta),
        SeekFrom::End(delta) => len.checked_add_signed(delta),
    };
    target.ok_or(CirrusError::InvalidRange {
        start: current,
        end: len,
        len,
    })
}

//! Multi-part ranged read stream
//!
//! Reads a window `[start, end)` of a file's physical byte space. The window
//! may span several parts; each part's slice is opened lazily as the read
//! position enters it.

use super::{resolve_seek, ReadStream};
use crate::opener::{OpenedRange, RangeOpener};
use async_trait::async_trait;
use bytes::{Buf, Bytes};
use cirrus_core::error::{CirrusError, Result};
use cirrus_core::file::LogicalFile;
use futures::StreamExt;
use std::io::SeekFrom;
use std::sync::Arc;
use tracing::warn;

/// The response currently being consumed
struct Window {
    range: OpenedRange,
    /// Absolute physical offset where the window starts
    start: u64,
    /// Absolute physical offset of the next byte the body yields
    pos: u64,
    /// Absolute physical offset where the window ends
    end: u64,
    buffered: Bytes,
}

impl Window {
    fn contains(&self, offset: u64) -> bool {
        self.pos <= offset && offset < self.end
    }
}

/// Sequential reader over physical bytes of a logical file
pub struct RangeReadStream {
    opener: Arc<dyn RangeOpener>,
    file: LogicalFile,
    start: u64,
    end: u64,
    /// Absolute physical read position
    position: u64,
    current: Option<Window>,
}

impl RangeReadStream {
    /// Stream physical bytes `[start, end)` of `file`. Defaults cover the
    /// whole physical object; `end` is clamped to the physical size.
    pub fn new(
        opener: Arc<dyn RangeOpener>,
        file: LogicalFile,
        start: Option<u64>,
        end: Option<u64>,
    ) -> Result<Self> {
        let physical = file.physical_size();
        let end = end.unwrap_or(physical).min(physical);
        let start = start.unwrap_or(0);
        if start > end {
            return Err(CirrusError::InvalidRange {
                start,
                end,
                len: physical,
            });
        }

        Ok(Self {
            opener,
            file,
            start,
            end,
            position: start,
            current: None,
        })
    }

    pub fn file(&self) -> &LogicalFile {
        &self.file
    }

    /// Open the part slice containing the current position
    async fn open_window(&mut self) -> Result<Window> {
        let (idx, part_start) = self.file.part_at(self.position).ok_or_else(|| {
            CirrusError::Internal(format!(
                "offset {} is outside {}",
                self.position,
                self.file.full_path()
            ))
        })?;
        let part = &self.file.parts()[idx];
        let window_end = self.end.min(part_start + part.size);

        let range = self
            .opener
            .open(part, self.position - part_start, window_end - part_start)
            .await?;

        Ok(Window {
            range,
            start: self.position,
            pos: self.position,
            end: window_end,
            buffered: Bytes::new(),
        })
    }
}

#[async_trait]
impl ReadStream for RangeReadStream {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if buf.is_empty() || self.position >= self.end {
            return Ok(0);
        }

        // A seek may have left the open window
        if matches!(&self.current, Some(w) if !w.contains(self.position)) {
            self.current = None;
        }

        loop {
            if self.current.is_none() {
                self.current = Some(self.open_window().await?);
            }
            let Some(window) = self.current.as_mut() else {
                continue;
            };

            if window.buffered.is_empty() {
                if window.pos >= window.end {
                    self.current = None;
                    continue;
                }
                match window.range.body_mut().next().await {
                    Some(Ok(chunk)) => {
                        window.buffered = chunk;
                        continue;
                    }
                    Some(Err(e)) => {
                        self.current = None;
                        return Err(e);
                    }
                    None => {
                        let expected = window.end - window.start;
                        let actual = window.pos - window.start;
                        warn!(
                            path = %self.file.full_path(),
                            expected,
                            actual,
                            "Response ended before its range"
                        );
                        self.current = None;
                        return Err(CirrusError::UnexpectedEof { expected, actual });
                    }
                }
            }

            // Forward seek inside the window: discard instead of reconnecting
            let skip = self.position - window.pos;
            if skip > 0 {
                let n = skip.min(window.buffered.len() as u64) as usize;
                window.buffered.advance(n);
                window.pos += n as u64;
                continue;
            }

            let n = buf
                .len()
                .min(window.buffered.len())
                .min((window.end - window.pos) as usize);
            buf[..n].copy_from_slice(&window.buffered[..n]);
            window.buffered.advance(n);
            window.pos += n as u64;
            self.position += n as u64;

            if window.pos >= window.end {
                self.current = None;
            }
            return Ok(n);
        }
    }

    fn seek(&mut self, pos: SeekFrom) -> Result<u64> {
        let relative = resolve_seek(pos, self.position - self.start, self.len())?;
        self.position = self.start.saturating_add(relative);
        Ok(relative)
    }

    fn len(&self) -> u64 {
        self.end - self.start
    }

    fn position(&self) -> u64 {
        self.position - self.start
    }
}

impl std::fmt::Debug for RangeReadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RangeReadStream")
            .field("path", &self.file.full_path())
            .field("start", &self.start)
            .field("end", &self.end)
            .field("position", &self.position)
            .field("open", &self.current.is_some())
            .finish()
    }
}

// Copyright 2025 pfw-rs Project
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Indexed reader over one gzip archive.
//!
//! `TraceReader` validates an (archive, index) pair and hands out one-shot
//! streams over byte or line ranges. Every stream owns its own file handle
//! and decompressor; the index is the only shared artifact, so any number of
//! readers and streams may coexist on the same archive.

use std::path::{Path, PathBuf};

use crate::error::{Result, TraceError};
use crate::index::{Indexer, TraceIndex};

mod byte_stream;
mod line_bytes;
mod line_stream;

use byte_stream::ByteStream;
use line_bytes::LineByteStream;
pub use line_stream::LineIter;
use line_stream::{LineCursor, LineStream, MultiLineStream};

/// Default scratch-buffer size for stream internals.
pub const DEFAULT_STREAM_BUFFER: usize = 4 * 1024 * 1024;

/// What one `read()` call delivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Raw bytes, any boundary.
    Bytes,
    /// Exactly one complete line, including its newline.
    LineBytes,
    /// Zero or more complete lines; never splits one across calls.
    MultiLinesBytes,
    /// Exactly one parsed logical line.
    Line,
    /// Zero or more parsed logical lines.
    MultiLines,
}

/// How `start`/`end` in a [`StreamConfig`] are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeKind {
    /// Half-open `[start, end)` in uncompressed bytes.
    ByteRange,
    /// Inclusive `[start, end]`, 1-based line numbers.
    LineRange,
}

/// Fluent description of the stream to construct.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub kind: StreamKind,
    pub range: RangeKind,
    pub start: u64,
    pub end: u64,
    pub buffer_size: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        StreamConfig {
            kind: StreamKind::Bytes,
            range: RangeKind::ByteRange,
            start: 0,
            end: 0,
            buffer_size: DEFAULT_STREAM_BUFFER,
        }
    }
}

impl StreamConfig {
    pub fn new() -> StreamConfig {
        StreamConfig::default()
    }

    pub fn kind(mut self, kind: StreamKind) -> StreamConfig {
        self.kind = kind;
        self
    }

    pub fn range(mut self, range: RangeKind) -> StreamConfig {
        self.range = range;
        self
    }

    pub fn from(mut self, start: u64) -> StreamConfig {
        self.start = start;
        self
    }

    pub fn to(mut self, end: u64) -> StreamConfig {
        self.end = end;
        self
    }

    pub fn buffer_size(mut self, size: usize) -> StreamConfig {
        self.buffer_size = size.max(1);
        self
    }
}

/// One-shot pull iterator over a range of the archive.
///
/// `read` copies as many complete units as fit and returns 0 exactly when the
/// range is exhausted; errors are sticky. Streams cannot be replayed
/// (`can_reset` is false); construct a fresh stream instead.
pub trait TraceStream: std::fmt::Debug {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize>;
    fn done(&self) -> bool;
    fn can_reset(&self) -> bool {
        false
    }
}

/// Validated (archive, index) pair; the façade all streams start from.
#[derive(Debug)]
pub struct TraceReader {
    archive: PathBuf,
    index: TraceIndex,
}

impl TraceReader {
    /// Open against an existing sidecar. Fails with `NotFound` or `Stale`
    /// without touching the archive contents.
    pub fn open(archive: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<TraceReader> {
        let archive = archive.as_ref().to_path_buf();
        let index = TraceIndex::open(&archive, index_path)?;
        Ok(TraceReader { archive, index })
    }

    /// Open, building or rebuilding the sidecar first when needed.
    pub fn open_or_build(
        archive: impl AsRef<Path>,
        index_path: impl AsRef<Path>,
        checkpoint_size: u64,
        force_rebuild: bool,
    ) -> Result<TraceReader> {
        let archive = archive.as_ref().to_path_buf();
        let index = Indexer::new(&archive, index_path)
            .checkpoint_size(checkpoint_size)
            .force_rebuild(force_rebuild)
            .ensure()?;
        Ok(TraceReader { archive, index })
    }

    pub fn archive_path(&self) -> &Path {
        &self.archive
    }

    pub fn index(&self) -> &TraceIndex {
        &self.index
    }

    pub fn max_bytes(&self) -> u64 {
        self.index.max_bytes()
    }

    pub fn num_lines(&self) -> u64 {
        self.index.num_lines()
    }

    /// Byte-density estimate of how many lines `[start, end)` holds, padded
    /// by 10%. Used by the manifest mapper for pre-sizing.
    pub fn estimate_lines_in_range(&self, start: u64, end: u64) -> Result<u64> {
        self.check_byte_range(start, end)?;
        if self.max_bytes() == 0 {
            return Ok(0);
        }
        let density =
            (end - start) as f64 * self.num_lines() as f64 / self.max_bytes() as f64;
        Ok((density * 1.1).ceil() as u64)
    }

    /// Construct the stream described by `config`.
    pub fn stream(&self, config: &StreamConfig) -> Result<Box<dyn TraceStream>> {
        match config.range {
            RangeKind::ByteRange => {
                self.check_byte_range(config.start, config.end)?;
                match config.kind {
                    StreamKind::Bytes => Ok(Box::new(ByteStream::new(
                        &self.archive,
                        &self.index,
                        config.start,
                        config.end,
                    )?)),
                    StreamKind::MultiLinesBytes => {
                        Ok(Box::new(self.byte_range_source(config)?))
                    }
                    StreamKind::LineBytes | StreamKind::Line => Ok(Box::new(LineStream::new(
                        self.byte_range_iter(config)?,
                    ))),
                    StreamKind::MultiLines => Ok(Box::new(MultiLineStream::new(
                        self.byte_range_iter(config)?,
                    ))),
                }
            }
            RangeKind::LineRange => {
                self.check_line_range(config.start, config.end)?;
                let iter =
                    self.line_iter_sized(config.start, config.end, config.buffer_size)?;
                match config.kind {
                    StreamKind::LineBytes | StreamKind::Line => {
                        Ok(Box::new(LineStream::new(iter)))
                    }
                    _ => Ok(Box::new(MultiLineStream::new(iter))),
                }
            }
        }
    }

    /// Iterate complete lines `start_line..=end_line` (1-based, inclusive).
    pub fn line_iter(&self, start_line: u64, end_line: u64) -> Result<LineIter> {
        self.check_line_range(start_line, end_line)?;
        self.line_iter_sized(start_line, end_line, DEFAULT_STREAM_BUFFER)
    }

    /// Iterate the complete lines attributed to byte range `[start, end)`:
    /// a line belongs to the range containing its first byte.
    pub fn line_iter_bytes(&self, start: u64, end: u64) -> Result<LineIter> {
        self.check_byte_range(start, end)?;
        let src = LineByteStream::new_byte_range(
            &self.archive,
            &self.index,
            start,
            end,
            DEFAULT_STREAM_BUFFER,
        )?;
        Ok(LineIter::unfiltered(LineCursor::new(src)))
    }

    fn byte_range_source(&self, config: &StreamConfig) -> Result<LineByteStream> {
        LineByteStream::new_byte_range(
            &self.archive,
            &self.index,
            config.start,
            config.end,
            config.buffer_size,
        )
    }

    fn byte_range_iter(&self, config: &StreamConfig) -> Result<LineIter> {
        Ok(LineIter::unfiltered(LineCursor::new(
            self.byte_range_source(config)?,
        )))
    }

    fn line_iter_sized(&self, start_line: u64, end_line: u64, buffer_size: usize) -> Result<LineIter> {
        let (_, anchor) = self.index.find_checkpoint_before_line(start_line)?;
        let end_bound = self
            .index
            .line_anchor_after(end_line)
            .map(|a| a.offset)
            .unwrap_or_else(|| self.index.max_bytes());
        let src = LineByteStream::new_line_anchored(
            &self.archive,
            &self.index,
            anchor.offset,
            end_bound,
            buffer_size,
        )?;
        Ok(LineIter::filtered(
            LineCursor::new(src),
            anchor.line,
            start_line,
            end_line,
        ))
    }

    fn check_byte_range(&self, start: u64, end: u64) -> Result<()> {
        if start > end {
            return Err(TraceError::InvalidArgument(format!(
                "inverted byte range {}..{}",
                start, end
            )));
        }
        if end > self.max_bytes() {
            return Err(TraceError::OutOfRange(format!(
                "byte range end {} exceeds archive size {}",
                end,
                self.max_bytes()
            )));
        }
        Ok(())
    }

    fn check_line_range(&self, start: u64, end: u64) -> Result<()> {
        if start == 0 {
            return Err(TraceError::InvalidArgument(
                "line numbers are 1-based".to_string(),
            ));
        }
        if start > end {
            return Err(TraceError::InvalidArgument(format!(
                "inverted line range {}..{}",
                start, end
            )));
        }
        if end > self.num_lines() {
            return Err(TraceError::OutOfRange(format!(
                "line range end {} exceeds total lines {}",
                end,
                self.num_lines()
            )));
        }
        Ok(())
    }
}

use std::path::Path;

use crate::error::{Result, TraceError};
use crate::index::TraceIndex;

use super::byte_stream::ByteSource;
use super::TraceStream;

/// Line-aligned byte stream: every read hands back whole lines, each ending
/// in a newline (the final line of the archive may be unterminated).
///
/// Byte-range attribution is skip-left / expand-right: a line is delivered
/// iff its first byte lies in `[start, end)`. A partial leading line belongs
/// to the preceding range and is skipped; the line containing `end - 1` is
/// delivered in full even where it runs past `end`. Adjacent ranges therefore
/// partition the archive's lines exactly.
///
/// Operationally that collapses to one stop rule: starting from the first
/// line boundary at or after `start`, emit bytes until the first newline at
/// an absolute offset `>= end - 1` (or end of archive).
#[derive(Debug)]
pub(crate) struct LineByteStream {
    src: Option<ByteSource>,
    /// Absolute offset of the next byte the source will produce.
    abs: u64,
    /// Logical end of the range (exclusive, in line-attribution terms).
    end: u64,
    /// Still looking for the first line boundary at or after the start.
    aligning: bool,
    chunk: Vec<u8>,
    pending: Vec<u8>,
    pending_pos: usize,
    src_done: bool,
    done: bool,
    failed: bool,
}

impl LineByteStream {
    /// Stream the lines attributed to byte range `[start, end)`.
    pub(crate) fn new_byte_range(
        archive: &Path,
        index: &TraceIndex,
        start: u64,
        end: u64,
        buffer_size: usize,
    ) -> Result<LineByteStream> {
        if start >= end {
            return Ok(Self::empty(end));
        }
        if start == 0 {
            let src = ByteSource::open(archive, index, 0)?;
            return Ok(Self::started(src, 0, end, false, buffer_size));
        }
        // Look one byte back: if it is a newline, `start` is a line start and
        // nothing is skipped; otherwise the leading partial line belongs to
        // the previous range.
        let mut src = ByteSource::open(archive, index, start - 1)?;
        let mut prev = [0u8; 1];
        let n = src.read(&mut prev)?;
        if n == 0 {
            return Err(TraceError::Corrupt(format!(
                "archive ended at offset {} during line alignment",
                start - 1
            )));
        }
        let aligning = prev[0] != b'\n';
        Ok(Self::started(src, start, end, aligning, buffer_size))
    }

    /// Stream whole lines from `anchor_offset` (a known line start) up to the
    /// line-attribution end `end_bound`. Used by line-range streams, which
    /// filter by line number above this layer.
    pub(crate) fn new_line_anchored(
        archive: &Path,
        index: &TraceIndex,
        anchor_offset: u64,
        end_bound: u64,
        buffer_size: usize,
    ) -> Result<LineByteStream> {
        if anchor_offset >= end_bound {
            return Ok(Self::empty(end_bound));
        }
        let src = ByteSource::open(archive, index, anchor_offset)?;
        Ok(Self::started(src, anchor_offset, end_bound, false, buffer_size))
    }

    fn empty(end: u64) -> LineByteStream {
        LineByteStream {
            src: None,
            abs: end,
            end,
            aligning: false,
            chunk: Vec::new(),
            pending: Vec::new(),
            pending_pos: 0,
            src_done: true,
            done: true,
            failed: false,
        }
    }

    fn started(
        src: ByteSource,
        abs: u64,
        end: u64,
        aligning: bool,
        buffer_size: usize,
    ) -> LineByteStream {
        LineByteStream {
            src: Some(src),
            abs,
            end,
            aligning,
            chunk: vec![0u8; buffer_size.max(1)],
            pending: Vec::new(),
            pending_pos: 0,
            src_done: false,
            done: false,
            failed: false,
        }
    }

    /// One decompression round: pull a chunk from the source, resolve
    /// alignment if still needed, apply the stop rule, append to `pending`.
    fn fill_more(&mut self) -> Result<()> {
        if self.src_done {
            return Ok(());
        }
        let src = match self.src.as_mut() {
            Some(src) => src,
            None => {
                self.src_done = true;
                return Ok(());
            }
        };
        let n = src.read(&mut self.chunk)?;
        if n == 0 {
            self.src_done = true;
            return Ok(());
        }
        let mut data = &self.chunk[..n];
        let mut base = self.abs;
        self.abs += n as u64;

        if self.aligning {
            match data.iter().position(|&b| b == b'\n') {
                None => return Ok(()),
                Some(j) => {
                    let line_start = base + j as u64 + 1;
                    self.aligning = false;
                    if line_start >= self.end {
                        // The first complete line begins past the range.
                        self.src_done = true;
                        return Ok(());
                    }
                    data = &data[j + 1..];
                    base = line_start;
                }
            }
        }

        // Stop after the first newline at an absolute offset >= end - 1.
        let cut = self.end - 1;
        let keep = if base >= cut {
            match data.iter().position(|&b| b == b'\n') {
                Some(j) => {
                    self.src_done = true;
                    j + 1
                }
                None => data.len(),
            }
        } else if base + data.len() as u64 > cut {
            let from = (cut - base) as usize;
            match data[from..].iter().position(|&b| b == b'\n') {
                Some(j) => {
                    self.src_done = true;
                    from + j + 1
                }
                None => data.len(),
            }
        } else {
            data.len()
        };
        self.pending.extend_from_slice(&data[..keep]);
        Ok(())
    }

    fn pending_len(&self) -> usize {
        self.pending.len() - self.pending_pos
    }

    fn compact(&mut self) {
        if self.pending_pos > 0 {
            self.pending.drain(..self.pending_pos);
            self.pending_pos = 0;
        }
    }
}

impl TraceStream for LineByteStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.failed || self.done || buf.is_empty() {
            return Ok(0);
        }
        loop {
            let avail = self.pending_len();
            if avail == 0 {
                if self.src_done {
                    self.done = true;
                    return Ok(0);
                }
                self.compact();
                if let Err(e) = self.fill_more() {
                    self.failed = true;
                    return Err(e);
                }
                continue;
            }

            let take = buf.len().min(avail);
            let start = self.pending_pos;
            let prefix = &self.pending[start..start + take];
            if let Some(j) = prefix.iter().rposition(|&b| b == b'\n') {
                let n = j + 1;
                buf[..n].copy_from_slice(&self.pending[start..start + n]);
                self.pending_pos += n;
                return Ok(n);
            }
            if take < avail {
                // The next line is longer than the caller's buffer: split it
                // and retain the rest for the next call.
                buf.copy_from_slice(&self.pending[start..start + take]);
                self.pending_pos += take;
                return Ok(take);
            }
            if self.src_done {
                // Final line of the range without a trailing newline.
                buf[..take].copy_from_slice(&self.pending[start..start + take]);
                self.pending_pos += take;
                return Ok(take);
            }
            // The line continues in the source; accumulate more.
            self.compact();
            if let Err(e) = self.fill_more() {
                self.failed = true;
                return Err(e);
            }
        }
    }

    fn done(&self) -> bool {
        self.failed || self.done || (self.pending_len() == 0 && self.src_done)
    }
}

use crate::error::Result;

use super::line_bytes::LineByteStream;
use super::TraceStream;

const CURSOR_READ_SIZE: usize = 256 * 1024;

/// Splits a line-aligned byte stream into individual complete lines.
/// Lines keep their trailing newline; the archive's final line may not have
/// one. The accumulator grows to the longest line seen and no further.
#[derive(Debug)]
pub(crate) struct LineCursor {
    src: LineByteStream,
    chunk: Vec<u8>,
    chunk_len: usize,
    chunk_pos: usize,
    acc: Vec<u8>,
    line: Vec<u8>,
}

impl LineCursor {
    pub(crate) fn new(src: LineByteStream) -> LineCursor {
        LineCursor {
            src,
            chunk: vec![0u8; CURSOR_READ_SIZE],
            chunk_len: 0,
            chunk_pos: 0,
            acc: Vec::new(),
            line: Vec::new(),
        }
    }

    fn next_line(&mut self) -> Result<Option<&[u8]>> {
        loop {
            if self.chunk_pos < self.chunk_len {
                let data = &self.chunk[self.chunk_pos..self.chunk_len];
                if let Some(j) = data.iter().position(|&b| b == b'\n') {
                    self.line.clear();
                    self.line.extend_from_slice(&self.acc);
                    self.line
                        .extend_from_slice(&self.chunk[self.chunk_pos..self.chunk_pos + j + 1]);
                    self.acc.clear();
                    self.chunk_pos += j + 1;
                    return Ok(Some(&self.line));
                }
                let end = self.chunk_len;
                let start = self.chunk_pos;
                self.acc.extend_from_slice(&self.chunk[start..end]);
                self.chunk_pos = self.chunk_len;
            }
            if self.src.done() {
                if self.acc.is_empty() {
                    return Ok(None);
                }
                // Unterminated final line.
                self.line.clear();
                std::mem::swap(&mut self.line, &mut self.acc);
                return Ok(Some(&self.line));
            }
            self.chunk_len = self.src.read(&mut self.chunk)?;
            self.chunk_pos = 0;
        }
    }
}

/// Pull-iterator over complete lines, optionally restricted to an inclusive
/// 1-based line range. Emission stops exactly after the last requested line.
#[derive(Debug)]
pub struct LineIter {
    cursor: LineCursor,
    /// Number of the next line the cursor will yield.
    next_line_no: u64,
    start: u64,
    end: u64,
    done: bool,
}

impl LineIter {
    pub(crate) fn unfiltered(cursor: LineCursor) -> LineIter {
        LineIter {
            cursor,
            next_line_no: 1,
            start: 0,
            end: 0,
            done: false,
        }
    }

    pub(crate) fn filtered(
        cursor: LineCursor,
        initial_line: u64,
        start: u64,
        end: u64,
    ) -> LineIter {
        LineIter {
            cursor,
            next_line_no: initial_line,
            start,
            end,
            done: false,
        }
    }

    /// The next line in range, or `None` when the range is exhausted.
    /// The returned slice is valid until the next call.
    pub fn next_line(&mut self) -> Result<Option<&[u8]>> {
        if self.done {
            return Ok(None);
        }
        while self.start > 0 && self.next_line_no < self.start {
            if self.cursor.next_line()?.is_none() {
                self.done = true;
                return Ok(None);
            }
            self.next_line_no += 1;
        }
        if self.end > 0 && self.next_line_no > self.end {
            self.done = true;
            return Ok(None);
        }
        self.next_line_no += 1;
        match self.cursor.next_line()? {
            Some(line) => Ok(Some(line)),
            None => {
                self.done = true;
                Ok(None)
            }
        }
    }
}

/// `StreamKind::Line` / `LineBytes`: exactly one complete line per `read`.
/// A caller buffer smaller than the line receives the portion that fits and
/// the remainder is retained for the next call.
#[derive(Debug)]
pub(crate) struct LineStream {
    iter: LineIter,
    out: Vec<u8>,
    out_pos: usize,
    done: bool,
    failed: bool,
}

impl LineStream {
    pub(crate) fn new(iter: LineIter) -> LineStream {
        LineStream {
            iter,
            out: Vec::new(),
            out_pos: 0,
            done: false,
            failed: false,
        }
    }
}

impl TraceStream for LineStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.done || self.failed || buf.is_empty() {
            return Ok(0);
        }
        if self.out_pos >= self.out.len() {
            match self.iter.next_line() {
                Err(e) => {
                    self.failed = true;
                    return Err(e);
                }
                Ok(None) => {
                    self.done = true;
                    return Ok(0);
                }
                Ok(Some(line)) => {
                    self.out.clear();
                    self.out.extend_from_slice(line);
                    self.out_pos = 0;
                }
            }
        }
        let n = buf.len().min(self.out.len() - self.out_pos);
        buf[..n].copy_from_slice(&self.out[self.out_pos..self.out_pos + n]);
        self.out_pos += n;
        Ok(n)
    }

    fn done(&self) -> bool {
        self.done || self.failed
    }
}

/// `StreamKind::MultiLines` (and line-ranged `MultiLinesBytes`): each `read`
/// packs as many complete lines as fit in the caller's buffer.
#[derive(Debug)]
pub(crate) struct MultiLineStream {
    iter: LineIter,
    out: Vec<u8>,
    out_pos: usize,
    done: bool,
    failed: bool,
}

impl MultiLineStream {
    pub(crate) fn new(iter: LineIter) -> MultiLineStream {
        MultiLineStream {
            iter,
            out: Vec::new(),
            out_pos: 0,
            done: false,
            failed: false,
        }
    }
}

impl TraceStream for MultiLineStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.done || self.failed || buf.is_empty() {
            return Ok(0);
        }
        if self.out_pos >= self.out.len() {
            self.out.clear();
            self.out_pos = 0;
            while self.out.len() < buf.len() {
                match self.iter.next_line() {
                    Err(e) => {
                        self.failed = true;
                        return Err(e);
                    }
                    Ok(None) => break,
                    Ok(Some(line)) => self.out.extend_from_slice(line),
                }
            }
            if self.out.is_empty() {
                self.done = true;
                return Ok(0);
            }
        }
        let avail = self.out.len() - self.out_pos;
        let take = buf.len().min(avail);
        let start = self.out_pos;
        let prefix = &self.out[start..start + take];
        let n = match prefix.iter().rposition(|&b| b == b'\n') {
            Some(j) => j + 1,
            // Either the final unterminated line (take == avail) or a line
            // longer than the caller's buffer; both emit what fits.
            None => take,
        };
        buf[..n].copy_from_slice(&self.out[start..start + n]);
        self.out_pos += n;
        Ok(n)
    }

    fn done(&self) -> bool {
        self.done || self.failed
    }
}

use std::fs::File;
use std::path::Path;

use log::debug;

use crate::error::{Result, TraceError};
use crate::index::TraceIndex;
use crate::inflate::Inflater;

use super::TraceStream;

/// Positioned decompressed-byte producer: checkpoint seek at construction,
/// then strictly forward reads. Owns its file handle and inflate state.
#[derive(Debug)]
pub(crate) struct ByteSource {
    file: File,
    inflater: Inflater,
    pos: u64,
}

impl ByteSource {
    /// Open the archive positioned so the next byte read is `start`
    /// (uncompressed). Seeks via the nearest checkpoint at or before `start`
    /// and discards the remainder.
    pub(crate) fn open(archive: &Path, index: &TraceIndex, start: u64) -> Result<ByteSource> {
        let mut file = File::open(archive)?;
        let checkpoint = index.find_checkpoint_before_offset(start)?;
        let mut inflater = Inflater::new_gzip()?;
        if checkpoint.uncompressed_offset > 0 {
            let window = index.checkpoint_window(&checkpoint)?;
            inflater.restore(&mut file, checkpoint.compressed_offset, checkpoint.bits, &window)?;
        }
        debug!(
            "seek to uc={} via checkpoint at uc={} (skip {})",
            start,
            checkpoint.uncompressed_offset,
            start - checkpoint.uncompressed_offset
        );
        let mut src = ByteSource {
            file,
            inflater,
            pos: checkpoint.uncompressed_offset,
        };
        if start > src.pos {
            src.inflater.skip(&mut src.file, start - src.pos)?;
            src.pos = start;
        }
        Ok(src)
    }

    /// Read decompressed bytes; 0 means the gzip stream ended cleanly.
    pub(crate) fn read(&mut self, out: &mut [u8]) -> Result<usize> {
        let n = self.inflater.read(&mut self.file, out)?;
        self.pos += n as u64;
        Ok(n)
    }

}

/// `StreamKind::Bytes`: raw bytes of `[start, end)`, any boundary.
#[derive(Debug)]
pub(crate) struct ByteStream {
    src: Option<ByteSource>,
    pos: u64,
    end: u64,
    done: bool,
    failed: bool,
}

impl ByteStream {
    pub(crate) fn new(
        archive: &Path,
        index: &TraceIndex,
        start: u64,
        end: u64,
    ) -> Result<ByteStream> {
        if start >= end {
            return Ok(ByteStream {
                src: None,
                pos: start,
                end,
                done: true,
                failed: false,
            });
        }
        Ok(ByteStream {
            src: Some(ByteSource::open(archive, index, start)?),
            pos: start,
            end,
            done: false,
            failed: false,
        })
    }
}

impl TraceStream for ByteStream {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.done || self.failed || buf.is_empty() {
            return Ok(0);
        }
        if self.pos >= self.end {
            self.done = true;
            return Ok(0);
        }
        let src = match self.src.as_mut() {
            Some(src) => src,
            None => {
                self.done = true;
                return Ok(0);
            }
        };
        let want = buf.len().min((self.end - self.pos) as usize);
        match src.read(&mut buf[..want]) {
            Ok(0) => {
                // The index promised more bytes than the stream delivered.
                self.failed = true;
                Err(TraceError::Corrupt(format!(
                    "archive ended at uncompressed offset {} before requested end {}",
                    self.pos, self.end
                )))
            }
            Ok(n) => {
                self.pos += n as u64;
                Ok(n)
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    fn done(&self) -> bool {
        self.done || self.failed
    }
}

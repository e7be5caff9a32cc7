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

//! Resumable zlib inflate engine.
//!
//! flate2 covers one-shot gzip well but does not surface `inflatePrime` or
//! `inflateSetDictionary`, both of which are required to restart a
//! decompressor mid-stream. This module wraps those libz entry points
//! directly. Restart follows the classic zran recipe: seek to the
//! checkpoint's compressed offset, re-prime the 0-7 leftover bits of the
//! previous byte, and install the saved 32 KiB of preceding output as the
//! inflate dictionary.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::os::raw::{c_int, c_uint};
use std::ptr;

use libz_sys::{
    inflate, inflateEnd, inflateInit2_, inflatePrime, inflateReset2, inflateSetDictionary,
    z_stream, zlibVersion, Z_BLOCK, Z_BUF_ERROR, Z_NEED_DICT, Z_NO_FLUSH, Z_OK, Z_STREAM_END,
};

use crate::error::{Result, TraceError};

/// Sliding-window size mandated by deflate; checkpoints carry this much
/// uncompressed history.
pub const WINDOW_SIZE: usize = 32 * 1024;

/// 15-bit window plus gzip wrapper.
const GZIP_WINDOW_BITS: c_int = 15 + 16;
/// Raw deflate, used when restarting from a checkpoint past the gzip header.
const RAW_WINDOW_BITS: c_int = -15;

const IN_BUF_SIZE: usize = 16 * 1024;

/// A single inflate session over one archive file handle.
///
/// The `z_stream` is boxed because libz keeps an internal back-pointer to it;
/// the struct itself may move freely.
pub struct Inflater {
    strm: Box<z_stream>,
    in_buf: Box<[u8]>,
    /// File offset one past the last byte handed to zlib.
    in_file_pos: u64,
    stream_end: bool,
}

impl std::fmt::Debug for Inflater {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Inflater")
            .field("in_file_pos", &self.in_file_pos)
            .field("stream_end", &self.stream_end)
            .finish()
    }
}

impl Inflater {
    /// Start a gzip-mode session. The caller is expected to have positioned
    /// the file at the start of the gzip member (normally offset 0).
    pub fn new_gzip() -> Result<Inflater> {
        // zlib requires a zeroed stream with Z_NULL allocators before init.
        // z_stream's alloc/free function pointers are not `Option`-wrapped,
        // so a literal `mem::zeroed()` is rejected by the compiler's validity
        // check even though zlib treats an all-zero stream as well-formed;
        // write the zero bytes directly instead of going through that check.
        let mut strm: Box<z_stream> = unsafe {
            let mut uninit: Box<std::mem::MaybeUninit<z_stream>> =
                Box::new(std::mem::MaybeUninit::uninit());
            std::ptr::write_bytes(uninit.as_mut_ptr(), 0, 1);
            std::mem::transmute(uninit)
        };
        let ret = unsafe {
            inflateInit2_(
                &mut *strm,
                GZIP_WINDOW_BITS,
                zlibVersion(),
                std::mem::size_of::<z_stream>() as c_int,
            )
        };
        if ret != Z_OK {
            return Err(TraceError::Corrupt(format!(
                "inflateInit2 failed with code {}",
                ret
            )));
        }
        Ok(Inflater {
            strm,
            in_buf: vec![0u8; IN_BUF_SIZE].into_boxed_slice(),
            in_file_pos: 0,
            stream_end: false,
        })
    }

    /// Restart this session from a checkpoint in raw-deflate mode.
    ///
    /// `compressed_offset` addresses the first byte whose bits have not all
    /// been consumed; `bits` of the preceding byte are re-primed first, then
    /// `window` (the last up-to-32 KiB of uncompressed output before the
    /// checkpoint) becomes the inflate dictionary.
    pub fn restore(
        &mut self,
        file: &mut File,
        compressed_offset: u64,
        bits: u8,
        window: &[u8],
    ) -> Result<()> {
        let seek_to = if bits != 0 {
            compressed_offset - 1
        } else {
            compressed_offset
        };
        file.seek(SeekFrom::Start(seek_to))?;

        let ret = unsafe { inflateReset2(&mut *self.strm, RAW_WINDOW_BITS) };
        if ret != Z_OK {
            return Err(TraceError::Corrupt(format!(
                "inflateReset2 failed with code {}",
                ret
            )));
        }
        self.strm.next_in = ptr::null_mut();
        self.strm.avail_in = 0;
        self.stream_end = false;
        self.in_file_pos = seek_to;

        if bits != 0 {
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte)?;
            self.in_file_pos += 1;
            let value = (byte[0] >> (8 - bits)) as c_int;
            let ret = unsafe { inflatePrime(&mut *self.strm, bits as c_int, value) };
            if ret != Z_OK {
                return Err(TraceError::Corrupt(format!(
                    "inflatePrime failed with code {}",
                    ret
                )));
            }
        }

        if !window.is_empty() {
            let ret = unsafe {
                inflateSetDictionary(&mut *self.strm, window.as_ptr(), window.len() as c_uint)
            };
            if ret != Z_OK {
                return Err(TraceError::Corrupt(format!(
                    "inflateSetDictionary failed with code {}",
                    ret
                )));
            }
        }
        Ok(())
    }

    /// Inflate into `out` until it is full, the stream ends, or (when
    /// `stop_at_block` is set) a deflate block boundary is reached after at
    /// least one byte of output. Returns (bytes produced, stopped-at-boundary).
    pub fn read_block(&mut self, file: &mut File, out: &mut [u8]) -> Result<(usize, bool)> {
        self.read_inner(file, out, Z_BLOCK, true)
    }

    /// Inflate into `out` until it is full or the stream ends.
    pub fn read(&mut self, file: &mut File, out: &mut [u8]) -> Result<usize> {
        let (n, _) = self.read_inner(file, out, Z_NO_FLUSH, false)?;
        Ok(n)
    }

    fn read_inner(
        &mut self,
        file: &mut File,
        out: &mut [u8],
        flush: c_int,
        stop_at_block: bool,
    ) -> Result<(usize, bool)> {
        if self.stream_end || out.is_empty() {
            return Ok((0, false));
        }
        self.strm.next_out = out.as_mut_ptr();
        self.strm.avail_out = out.len() as c_uint;
        let mut at_boundary = false;

        loop {
            if self.strm.avail_in == 0 {
                let n = file.read(&mut self.in_buf)?;
                if n == 0 {
                    if self.strm.avail_out == out.len() as c_uint {
                        // Input ran out before the stream's end marker and
                        // nothing was produced: the archive is truncated.
                        return Err(TraceError::Corrupt(
                            "unexpected end of gzip stream".to_string(),
                        ));
                    }
                    break;
                }
                self.in_file_pos += n as u64;
                self.strm.next_in = self.in_buf.as_mut_ptr();
                self.strm.avail_in = n as c_uint;
            }

            let ret = unsafe { inflate(&mut *self.strm, flush) };
            match ret {
                Z_STREAM_END => {
                    self.stream_end = true;
                    break;
                }
                Z_OK => {}
                Z_BUF_ERROR => {
                    // Needs more input or more output space; the loop refills
                    // input, and a full output buffer ends the call below.
                    if self.strm.avail_out == 0 {
                        break;
                    }
                }
                Z_NEED_DICT => {
                    return Err(TraceError::Corrupt(
                        "inflate requires a preset dictionary".to_string(),
                    ));
                }
                _ => {
                    return Err(TraceError::Corrupt(format!(
                        "zlib inflate error {}: {}",
                        ret,
                        self.msg()
                    )));
                }
            }

            if self.strm.avail_out == 0 {
                break;
            }
            if stop_at_block
                && self.at_block_boundary()
                && self.strm.avail_out < out.len() as c_uint
            {
                at_boundary = true;
                break;
            }
        }

        let produced = out.len() - self.strm.avail_out as usize;
        self.strm.next_out = ptr::null_mut();
        self.strm.avail_out = 0;
        Ok((produced, at_boundary))
    }

    /// Discard exactly `count` bytes of uncompressed output.
    pub fn skip(&mut self, file: &mut File, mut count: u64) -> Result<()> {
        let mut scratch = vec![0u8; 64 * 1024];
        while count > 0 {
            let want = count.min(scratch.len() as u64) as usize;
            let got = self.read(file, &mut scratch[..want])?;
            if got == 0 {
                return Err(TraceError::Corrupt(
                    "gzip stream ended while seeking".to_string(),
                ));
            }
            count -= got as u64;
        }
        Ok(())
    }

    /// True when the decompressor stopped exactly at a deflate block boundary
    /// that is not the final block (the only positions a checkpoint can
    /// restart from).
    pub fn at_block_boundary(&self) -> bool {
        (self.strm.data_type & 0xc0) == 0x80
    }

    /// Unused bits of the last consumed compressed byte (0-7).
    pub fn unused_bits(&self) -> u8 {
        (self.strm.data_type & 7) as u8
    }

    /// Absolute archive offset of the next compressed byte zlib will consume.
    pub fn compressed_offset(&self) -> u64 {
        self.in_file_pos - self.strm.avail_in as u64
    }

    pub fn is_stream_end(&self) -> bool {
        self.stream_end
    }

    fn msg(&self) -> String {
        if self.strm.msg.is_null() {
            "no detail".to_string()
        } else {
            unsafe { std::ffi::CStr::from_ptr(self.strm.msg) }
                .to_string_lossy()
                .into_owned()
        }
    }
}

impl Drop for Inflater {
    fn drop(&mut self) {
        unsafe {
            inflateEnd(&mut *self.strm);
        }
    }
}

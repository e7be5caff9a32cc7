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

//! Persistent gzip random-access index.
//!
//! One sidecar file per archive, little-endian throughout:
//!
//! ```text
//! header        magic, version, archive fingerprint (size + mtime + sha256),
//!               checkpoint_size, num_lines, max_bytes, table counts/offsets
//! ckpt table    fixed-width entries, binary-searchable in place
//! line map      sorted (line_number, uncompressed_offset) pairs
//! windows       zlib-compressed 32 KiB inflate dictionaries
//! ```
//!
//! Fixed-width checkpoint entries let the reader binary-search the mmap
//! without materializing any window; windows load lazily per checkpoint.

use std::fs::Metadata;
use std::io::Read;
use std::path::Path;
use std::time::UNIX_EPOCH;

use sha2::{Digest, Sha256};

use crate::error::Result;

pub const MAGIC: u32 = 0x5046_5758; // "PFWX"
pub const VERSION: u32 = 1;

/// Default spacing between checkpoints, in uncompressed bytes.
pub const DEFAULT_CHECKPOINT_SIZE: u64 = 32 * 1024 * 1024;

pub(crate) const HEADER_LEN: usize = 112;
pub(crate) const CKPT_ENTRY_LEN: usize = 37;
pub(crate) const LINE_MAP_ENTRY_LEN: usize = 16;

/// A resumable decompressor state at a known uncompressed offset.
#[derive(Debug, Clone)]
pub struct Checkpoint {
    /// Byte position in the decompressed stream.
    pub uncompressed_offset: u64,
    /// Archive offset of the first compressed byte whose bits are not all
    /// consumed yet.
    pub compressed_offset: u64,
    /// Unused bits (0-7) of the byte before `compressed_offset`.
    pub bits: u8,
    /// 1-based number of the first line starting at or after
    /// `uncompressed_offset`.
    pub line_number: u64,
    pub(crate) window_off: u64,
    pub(crate) window_len: u32,
}

/// A known exact line boundary: `line` starts at byte `offset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineAnchor {
    pub line: u64,
    pub offset: u64,
}

/// Enough identity to detect that an archive changed under its index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveFingerprint {
    pub size: u64,
    pub mtime_unix: i64,
    pub sha256: [u8; 32],
}

impl ArchiveFingerprint {
    /// Compute a fingerprint with a full content hash (used at build time).
    pub fn compute(path: &Path) -> Result<ArchiveFingerprint> {
        let meta = std::fs::metadata(path)?;
        let mut hasher = Sha256::new();
        let mut file = std::fs::File::open(path)?;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = file.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        let mut sha256 = [0u8; 32];
        sha256.copy_from_slice(&hasher.finalize());
        Ok(ArchiveFingerprint {
            size: meta.len(),
            mtime_unix: mtime_unix(&meta),
            sha256,
        })
    }
}

pub(crate) fn mtime_unix(meta: &Metadata) -> i64 {
    match meta.modified() {
        Ok(t) => match t.duration_since(UNIX_EPOCH) {
            Ok(d) => d.as_secs() as i64,
            Err(e) => -(e.duration().as_secs() as i64),
        },
        Err(_) => 0,
    }
}

mod reader;
mod writer;

pub use reader::TraceIndex;
pub use writer::Indexer;

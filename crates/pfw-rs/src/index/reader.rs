use std::fs::File;
use std::path::{Path, PathBuf};

use memmap2::Mmap;

use crate::error::{Result, TraceError};
use crate::gzip;

use super::{
    mtime_unix, Checkpoint, LineAnchor, CKPT_ENTRY_LEN, HEADER_LEN, LINE_MAP_ENTRY_LEN, MAGIC,
    VERSION,
};

/// A validated, read-only view of one sidecar index.
///
/// The file is mmapped; checkpoint and line-map lookups binary-search the
/// fixed-width tables in place and only the requested checkpoint's window is
/// ever decompressed. A `TraceIndex` is freely shareable across readers.
pub struct TraceIndex {
    mmap: Mmap,
    index_path: PathBuf,
    checkpoint_size: u64,
    num_lines: u64,
    max_bytes: u64,
    n_checkpoints: u32,
    n_line_map: u32,
    ckpt_table_off: usize,
    line_map_off: usize,
    archive_sha256: [u8; 32],
}

impl std::fmt::Debug for TraceIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TraceIndex")
            .field("index_path", &self.index_path)
            .field("checkpoint_size", &self.checkpoint_size)
            .field("num_lines", &self.num_lines)
            .field("max_bytes", &self.max_bytes)
            .field("n_checkpoints", &self.n_checkpoints)
            .field("n_line_map", &self.n_line_map)
            .field("ckpt_table_off", &self.ckpt_table_off)
            .field("line_map_off", &self.line_map_off)
            .field("archive_sha256", &self.archive_sha256)
            .finish()
    }
}

impl TraceIndex {
    /// Open and validate the sidecar for `archive`.
    ///
    /// Returns `NotFound` when archive or sidecar is missing, `Stale` when
    /// the sidecar does not match the archive (fingerprint, magic, version,
    /// or any truncation); a partial read is never exposed.
    pub fn open(archive: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Result<TraceIndex> {
        let archive = archive.as_ref();
        let index_path = index_path.as_ref();

        let archive_meta = std::fs::metadata(archive).map_err(|_| {
            TraceError::NotFound(format!("archive does not exist: {}", archive.display()))
        })?;
        let file = File::open(index_path).map_err(|_| {
            TraceError::NotFound(format!("no index sidecar at {}", index_path.display()))
        })?;
        let mmap = unsafe { Mmap::map(&file)? };

        let stale = |what: &str| TraceError::Stale(format!("{}: {}", index_path.display(), what));

        if mmap.len() < HEADER_LEN {
            return Err(stale("sidecar shorter than header"));
        }
        let magic = read_u32(&mmap, 0);
        let version = read_u32(&mmap, 4);
        if magic != MAGIC {
            return Err(stale("bad magic"));
        }
        if version != VERSION {
            return Err(stale("unsupported sidecar version"));
        }

        let archive_size = read_u64(&mmap, 8);
        let archive_mtime = read_u64(&mmap, 16) as i64;
        if archive_size != archive_meta.len() || archive_mtime != mtime_unix(&archive_meta) {
            return Err(TraceError::Stale(format!(
                "archive {} changed since the index was built",
                archive.display()
            )));
        }
        let mut archive_sha256 = [0u8; 32];
        archive_sha256.copy_from_slice(&mmap[24..56]);

        let checkpoint_size = read_u64(&mmap, 56);
        let num_lines = read_u64(&mmap, 64);
        let max_bytes = read_u64(&mmap, 72);
        let n_checkpoints = read_u32(&mmap, 80);
        let n_line_map = read_u32(&mmap, 84);
        let ckpt_table_off = read_u64(&mmap, 88) as usize;
        let line_map_off = read_u64(&mmap, 96) as usize;
        let windows_off = read_u64(&mmap, 104) as usize;

        let ckpt_table_end = ckpt_table_off
            .checked_add(n_checkpoints as usize * CKPT_ENTRY_LEN)
            .ok_or_else(|| stale("checkpoint table overflows"))?;
        let line_map_end = line_map_off
            .checked_add(n_line_map as usize * LINE_MAP_ENTRY_LEN)
            .ok_or_else(|| stale("line map overflows"))?;
        if ckpt_table_off < HEADER_LEN
            || ckpt_table_end > line_map_off
            || line_map_end > windows_off
            || windows_off > mmap.len()
        {
            return Err(stale("sidecar sections truncated or out of order"));
        }
        if n_checkpoints == 0 {
            return Err(stale("sidecar has no checkpoints"));
        }

        Ok(TraceIndex {
            mmap,
            index_path: index_path.to_path_buf(),
            checkpoint_size,
            num_lines,
            max_bytes,
            n_checkpoints,
            n_line_map,
            ckpt_table_off,
            line_map_off,
            archive_sha256,
        })
    }

    pub fn index_path(&self) -> &Path {
        &self.index_path
    }

    pub fn num_lines(&self) -> u64 {
        self.num_lines
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn checkpoint_size(&self) -> u64 {
        self.checkpoint_size
    }

    pub fn n_checkpoints(&self) -> u32 {
        self.n_checkpoints
    }

    pub fn archive_sha256(&self) -> [u8; 32] {
        self.archive_sha256
    }

    pub fn checkpoint(&self, idx: u32) -> Result<Checkpoint> {
        if idx >= self.n_checkpoints {
            return Err(TraceError::InvalidArgument(format!(
                "checkpoint index {} out of range ({} checkpoints)",
                idx, self.n_checkpoints
            )));
        }
        let base = self.ckpt_table_off + idx as usize * CKPT_ENTRY_LEN;
        Ok(Checkpoint {
            uncompressed_offset: read_u64(&self.mmap, base),
            compressed_offset: read_u64(&self.mmap, base + 8),
            bits: self.mmap[base + 16],
            line_number: read_u64(&self.mmap, base + 17),
            window_off: read_u64(&self.mmap, base + 25),
            window_len: read_u32(&self.mmap, base + 33),
        })
    }

    /// Last checkpoint with `uncompressed_offset <= offset`.
    pub fn find_checkpoint_before_offset(&self, offset: u64) -> Result<Checkpoint> {
        let mut lo = 0u32;
        let mut hi = self.n_checkpoints;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let uc = read_u64(&self.mmap, self.ckpt_table_off + mid as usize * CKPT_ENTRY_LEN);
            if uc <= offset {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        // Checkpoint 0 sits at offset 0, so lo >= 1 for any offset.
        self.checkpoint(lo.saturating_sub(1))
    }

    /// Largest known line boundary at or before `line`, and the checkpoint to
    /// restart from to reach it.
    pub fn find_checkpoint_before_line(&self, line: u64) -> Result<(Checkpoint, LineAnchor)> {
        if line == 0 {
            return Err(TraceError::InvalidArgument(
                "line numbers are 1-based".to_string(),
            ));
        }
        let idx = self.line_map_partition(line);
        // The line map always carries (1, 0).
        let anchor = self.line_map_entry(idx.saturating_sub(1));
        let checkpoint = self.find_checkpoint_before_offset(anchor.offset)?;
        Ok((checkpoint, anchor))
    }

    /// First known line boundary strictly after `line`, if any. Used to bound
    /// the bytes a line-range stream has to decompress.
    pub fn line_anchor_after(&self, line: u64) -> Option<LineAnchor> {
        let idx = self.line_map_partition(line);
        if idx < self.n_line_map as usize {
            Some(self.line_map_entry(idx))
        } else {
            None
        }
    }

    /// Decompress the 32 KiB inflate window for `checkpoint`. Empty for
    /// checkpoint 0, which restarts from the gzip header instead.
    pub fn checkpoint_window(&self, checkpoint: &Checkpoint) -> Result<Vec<u8>> {
        if checkpoint.window_len == 0 {
            return Ok(Vec::new());
        }
        let start = checkpoint.window_off as usize;
        let end = start + checkpoint.window_len as usize;
        if end > self.mmap.len() || start < self.line_map_off {
            return Err(TraceError::Corrupt(format!(
                "{}: checkpoint window out of bounds",
                self.index_path.display()
            )));
        }
        gzip::decompress_window(&self.mmap[start..end])
    }

    /// Count of line-map entries with `line <= target` (partition point).
    fn line_map_partition(&self, target: u64) -> usize {
        let mut lo = 0usize;
        let mut hi = self.n_line_map as usize;
        while lo < hi {
            let mid = (lo + hi) / 2;
            let line = read_u64(&self.mmap, self.line_map_off + mid * LINE_MAP_ENTRY_LEN);
            if line <= target {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    fn line_map_entry(&self, idx: usize) -> LineAnchor {
        let base = self.line_map_off + idx * LINE_MAP_ENTRY_LEN;
        LineAnchor {
            line: read_u64(&self.mmap, base),
            offset: read_u64(&self.mmap, base + 8),
        }
    }
}

fn read_u32(mmap: &Mmap, off: usize) -> u32 {
    u32::from_le_bytes(mmap[off..off + 4].try_into().unwrap())
}

fn read_u64(mmap: &Mmap, off: usize) -> u64 {
    u64::from_le_bytes(mmap[off..off + 8].try_into().unwrap())
}

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use crate::error::{Result, TraceError};
use crate::gzip;
use crate::inflate::{Inflater, WINDOW_SIZE};

use super::{
    ArchiveFingerprint, TraceIndex, CKPT_ENTRY_LEN, DEFAULT_CHECKPOINT_SIZE, HEADER_LEN,
    LINE_MAP_ENTRY_LEN, MAGIC, VERSION,
};

const SCAN_BUF_SIZE: usize = 64 * 1024;

/// Builds a sidecar index for one archive with a single decompression pass.
///
/// Construction is fluent, mirroring the archive-side defaults:
///
/// ```ignore
/// let index = Indexer::new(&gz_path, &idx_path)
///     .checkpoint_size(4 * 1024 * 1024)
///     .ensure()?;
/// ```
pub struct Indexer {
    archive: PathBuf,
    index_path: PathBuf,
    checkpoint_size: u64,
    force_rebuild: bool,
}

struct CheckpointRec {
    uncompressed_offset: u64,
    compressed_offset: u64,
    bits: u8,
    line_number: u64,
    window: Vec<u8>, // zlib-compressed; empty for checkpoint 0
}

struct ScanResult {
    num_lines: u64,
    max_bytes: u64,
    checkpoints: Vec<CheckpointRec>,
    line_map: Vec<(u64, u64)>,
}

impl Indexer {
    pub fn new(archive: impl AsRef<Path>, index_path: impl AsRef<Path>) -> Indexer {
        Indexer {
            archive: archive.as_ref().to_path_buf(),
            index_path: index_path.as_ref().to_path_buf(),
            checkpoint_size: DEFAULT_CHECKPOINT_SIZE,
            force_rebuild: false,
        }
    }

    pub fn checkpoint_size(mut self, bytes: u64) -> Indexer {
        self.checkpoint_size = bytes;
        self
    }

    pub fn force_rebuild(mut self, force: bool) -> Indexer {
        self.force_rebuild = force;
        self
    }

    /// Return the existing index when it is valid and was built with the same
    /// checkpoint spacing; otherwise scan the archive and (re)build it.
    pub fn ensure(&self) -> Result<TraceIndex> {
        if !self.force_rebuild {
            match TraceIndex::open(&self.archive, &self.index_path) {
                Ok(index) if index.checkpoint_size() == self.checkpoint_size => {
                    debug!(
                        "index {} is current, skipping rebuild",
                        self.index_path.display()
                    );
                    return Ok(index);
                }
                Ok(_) => {
                    debug!(
                        "index {} was built with a different checkpoint size, rebuilding",
                        self.index_path.display()
                    );
                }
                Err(e) if e.is_stale() || e.is_not_found() => {
                    debug!("index {}: {}, rebuilding", self.index_path.display(), e);
                }
                Err(e) => return Err(e),
            }
        }
        self.build()
    }

    /// Unconditionally scan the archive and publish a fresh sidecar.
    pub fn build(&self) -> Result<TraceIndex> {
        if self.checkpoint_size == 0 {
            return Err(TraceError::InvalidArgument(
                "checkpoint size must be greater than zero".to_string(),
            ));
        }
        if !self.archive.exists() {
            return Err(TraceError::NotFound(format!(
                "archive does not exist: {}",
                self.archive.display()
            )));
        }

        let fingerprint = ArchiveFingerprint::compute(&self.archive)?;
        let scan = scan_archive(&self.archive, self.checkpoint_size)?;
        info!(
            "indexed {}: {} lines, {} uncompressed bytes, {} checkpoints",
            self.archive.display(),
            scan.num_lines,
            scan.max_bytes,
            scan.checkpoints.len()
        );

        write_sidecar(&self.index_path, &fingerprint, self.checkpoint_size, &scan)?;
        TraceIndex::open(&self.archive, &self.index_path)
    }
}

/// One pass over the gzip stream: count lines, record exact line anchors, and
/// snapshot decompressor state every `checkpoint_size` uncompressed bytes at
/// deflate block boundaries.
fn scan_archive(archive: &Path, checkpoint_size: u64) -> Result<ScanResult> {
    let mut file = File::open(archive)?;
    let mut inflater = Inflater::new_gzip()?;
    let mut buf = vec![0u8; SCAN_BUF_SIZE];

    // Checkpoint 0 is implicit: offset 0 restarts from the gzip header and
    // needs no window.
    let mut checkpoints = vec![CheckpointRec {
        uncompressed_offset: 0,
        compressed_offset: 0,
        bits: 0,
        line_number: 1,
        window: Vec::new(),
    }];
    let mut line_map: Vec<(u64, u64)> = vec![(1, 0)];
    // Checkpoints cut mid-line wait here until the next newline reveals
    // which line starts after them.
    let mut pending: Vec<usize> = Vec::new();

    let mut uncompressed: u64 = 0;
    let mut newlines: u64 = 0;
    let mut last_checkpoint_at: u64 = 0;
    let mut last_byte_was_newline = true;
    // Rolling copy of the last 32 KiB of output, the restart dictionary.
    let mut window: Vec<u8> = Vec::with_capacity(2 * WINDOW_SIZE);

    loop {
        let (n, at_boundary) = inflater.read_block(&mut file, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];

        for (i, &b) in chunk.iter().enumerate() {
            if b == b'\n' {
                newlines += 1;
                if !pending.is_empty() {
                    let anchor_line = newlines + 1;
                    let anchor_off = uncompressed + i as u64 + 1;
                    for idx in pending.drain(..) {
                        checkpoints[idx].line_number = anchor_line;
                    }
                    line_map.push((anchor_line, anchor_off));
                }
            }
        }
        last_byte_was_newline = chunk[n - 1] == b'\n';
        uncompressed += n as u64;
        if n >= WINDOW_SIZE {
            window.clear();
            window.extend_from_slice(&chunk[n - WINDOW_SIZE..]);
        } else {
            window.extend_from_slice(chunk);
            if window.len() > WINDOW_SIZE {
                let excess = window.len() - WINDOW_SIZE;
                window.drain(..excess);
            }
        }

        let due = uncompressed - last_checkpoint_at >= checkpoint_size;
        if at_boundary && due && !inflater.is_stream_end() && !window.is_empty() {
            let rec = CheckpointRec {
                uncompressed_offset: uncompressed,
                compressed_offset: inflater.compressed_offset(),
                bits: inflater.unused_bits(),
                line_number: if last_byte_was_newline { newlines + 1 } else { 0 },
                window: gzip::compress_window(&window)?,
            };
            debug!(
                "checkpoint at uc={} c={} bits={}",
                rec.uncompressed_offset, rec.compressed_offset, rec.bits
            );
            let idx = checkpoints.len();
            checkpoints.push(rec);
            if last_byte_was_newline {
                // The checkpoint offset is itself a line start.
                if line_map.last().map(|&(l, _)| l) != Some(newlines + 1) {
                    line_map.push((newlines + 1, uncompressed));
                }
            } else {
                pending.push(idx);
            }
            last_checkpoint_at = uncompressed;
        }
    }

    // A trailing fragment without a newline is still a line.
    let num_lines = newlines + u64::from(uncompressed > 0 && !last_byte_was_newline);
    // A checkpoint in the final fragment names a line past the end; it can
    // still seed byte-offset seeks.
    for idx in pending {
        checkpoints[idx].line_number = num_lines + 1;
    }

    Ok(ScanResult {
        num_lines,
        max_bytes: uncompressed,
        checkpoints,
        line_map,
    })
}

fn write_sidecar(
    index_path: &Path,
    fingerprint: &ArchiveFingerprint,
    checkpoint_size: u64,
    scan: &ScanResult,
) -> Result<()> {
    let dir = index_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    std::fs::create_dir_all(&dir)?;

    let ckpt_table_off = HEADER_LEN as u64;
    let line_map_off = ckpt_table_off + (scan.checkpoints.len() * CKPT_ENTRY_LEN) as u64;
    let windows_off = line_map_off + (scan.line_map.len() * LINE_MAP_ENTRY_LEN) as u64;

    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    {
        let mut w = BufWriter::new(tmp.as_file_mut());

        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend(&MAGIC.to_le_bytes());
        header.extend(&VERSION.to_le_bytes());
        header.extend(&fingerprint.size.to_le_bytes());
        header.extend(&fingerprint.mtime_unix.to_le_bytes());
        header.extend(&fingerprint.sha256);
        header.extend(&checkpoint_size.to_le_bytes());
        header.extend(&scan.num_lines.to_le_bytes());
        header.extend(&scan.max_bytes.to_le_bytes());
        header.extend(&(scan.checkpoints.len() as u32).to_le_bytes());
        header.extend(&(scan.line_map.len() as u32).to_le_bytes());
        header.extend(&ckpt_table_off.to_le_bytes());
        header.extend(&line_map_off.to_le_bytes());
        header.extend(&windows_off.to_le_bytes());
        debug_assert_eq!(header.len(), HEADER_LEN);
        w.write_all(&header)?;

        let mut window_off = windows_off;
        for rec in &scan.checkpoints {
            w.write_all(&rec.uncompressed_offset.to_le_bytes())?;
            w.write_all(&rec.compressed_offset.to_le_bytes())?;
            w.write_all(&[rec.bits])?;
            w.write_all(&rec.line_number.to_le_bytes())?;
            if rec.window.is_empty() {
                w.write_all(&0u64.to_le_bytes())?;
                w.write_all(&0u32.to_le_bytes())?;
            } else {
                w.write_all(&window_off.to_le_bytes())?;
                w.write_all(&(rec.window.len() as u32).to_le_bytes())?;
                window_off += rec.window.len() as u64;
            }
        }

        for &(line, offset) in &scan.line_map {
            w.write_all(&line.to_le_bytes())?;
            w.write_all(&offset.to_le_bytes())?;
        }

        for rec in &scan.checkpoints {
            w.write_all(&rec.window)?;
        }
        w.flush()?;
    }

    // Readers either see the previous sidecar or the complete new one.
    tmp.persist(index_path).map_err(|e| TraceError::Io(e.error))?;
    Ok(())
}

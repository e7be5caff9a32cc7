use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, error};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::gzip;
use crate::json::{self, EventId};
use crate::reader::TraceReader;

use super::manifest::{ChunkManifest, ChunkSpec};

const MB: f64 = 1024.0 * 1024.0;

/// Inputs for materializing one output chunk.
pub struct ExtractRequest<'a> {
    /// 1-based, contiguous across the split.
    pub chunk_index: usize,
    pub manifest: &'a ChunkManifest,
    pub output_dir: &'a Path,
    pub app_name: &'a str,
    pub compress: bool,
    pub overwrite: bool,
    /// Capture per-event identities for verification.
    pub collect_event_ids: bool,
}

/// Outcome of one extraction task. Failures are carried here rather than
/// raised so the driver can report partial success.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub chunk_index: usize,
    pub output_path: PathBuf,
    pub size_mb: f64,
    pub events: u64,
    pub success: bool,
    pub error: Option<String>,
    /// SHA-256 over every written `(event, "\n")`, the chunk's identity.
    pub content_digest: Option<String>,
    pub event_ids: Option<Vec<EventId>>,
}

pub fn chunk_output_path(output_dir: &Path, app_name: &str, chunk_index: usize) -> PathBuf {
    output_dir.join(format!("{}-{}.pfw", app_name, chunk_index))
}

/// Materialize one chunk: a JSON array of every validated event in the
/// manifest's specs, in spec order, optionally gzipped in place.
pub fn extract_chunk(req: &ExtractRequest) -> ChunkResult {
    let plain_path = chunk_output_path(req.output_dir, req.app_name, req.chunk_index);
    let failed = |error: String| ChunkResult {
        chunk_index: req.chunk_index,
        output_path: plain_path.clone(),
        size_mb: 0.0,
        events: 0,
        success: false,
        error: Some(error),
        content_digest: None,
        event_ids: None,
    };

    // Refuse to clobber earlier output before anything is created, so the
    // failure path below cannot delete a pre-existing chunk.
    let gz_path = PathBuf::from(format!("{}.gz", plain_path.display()));
    if !req.overwrite && (plain_path.exists() || gz_path.exists()) {
        let msg = format!(
            "output {} already exists (use force to overwrite)",
            plain_path.display()
        );
        error!("chunk {}: {}", req.chunk_index, msg);
        return failed(msg);
    }

    match extract_and_write(req, &plain_path) {
        Ok(result) => result,
        Err(e) => {
            error!("failed to extract chunk {}: {}", req.chunk_index, e);
            // Leave no partial output behind.
            let _ = std::fs::remove_file(&plain_path);
            failed(e.to_string())
        }
    }
}

fn extract_and_write(req: &ExtractRequest, plain_path: &Path) -> Result<ChunkResult> {
    let mut out = BufWriter::with_capacity(1024 * 1024, File::create(plain_path)?);
    out.write_all(b"[\n")?;

    let mut hasher = Sha256::new();
    let mut events = 0u64;
    let mut event_ids = req.collect_event_ids.then(Vec::new);

    for spec in &req.manifest.specs {
        for_each_spec_line(spec, |line| {
            if let Some(trimmed) = json::trim_and_validate(line) {
                out.write_all(trimmed)?;
                out.write_all(b"\n")?;
                hasher.update(trimmed);
                hasher.update(b"\n");
                events += 1;
                if let Some(ids) = event_ids.as_mut() {
                    let id = json::extract_event_id(trimmed);
                    if id.is_valid() {
                        ids.push(id);
                    }
                }
            }
            Ok(())
        })?;
    }

    out.write_all(b"\n]\n")?;
    out.flush()?;
    drop(out);

    let size_mb = std::fs::metadata(plain_path)?.len() as f64 / MB;
    let mut output_path = plain_path.to_path_buf();
    if req.compress && events > 0 {
        output_path = gzip::compress_file_in_place(plain_path)?;
    }

    debug!(
        "chunk {}: {} events, {:.2} MiB written to {}",
        req.chunk_index,
        events,
        size_mb,
        output_path.display()
    );

    Ok(ChunkResult {
        chunk_index: req.chunk_index,
        output_path,
        size_mb,
        events,
        success: true,
        error: None,
        content_digest: Some(hex(&hasher.finalize())),
        event_ids,
    })
}

/// Drive `f` over every line the spec covers. Line ranges are authoritative
/// when present; byte ranges fall back to line-aligned attribution.
pub(crate) fn for_each_spec_line(
    spec: &ChunkSpec,
    mut f: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    match (&spec.index_path, spec.has_line_info()) {
        (Some(index_path), true) => {
            let reader = TraceReader::open(&spec.file_path, index_path)?;
            let mut lines = reader.line_iter(spec.start_line, spec.end_line)?;
            while let Some(line) = lines.next_line()? {
                f(line)?;
            }
            Ok(())
        }
        (Some(index_path), false) => {
            let reader = TraceReader::open(&spec.file_path, index_path)?;
            let mut lines = reader.line_iter_bytes(spec.start_byte, spec.end_byte)?;
            while let Some(line) = lines.next_line()? {
                f(line)?;
            }
            Ok(())
        }
        (None, true) => plain_line_range(&spec.file_path, spec.start_line, spec.end_line, f),
        (None, false) => plain_byte_range(&spec.file_path, spec.start_byte, spec.end_byte, f),
    }
}

fn plain_line_range(
    path: &Path,
    start_line: u64,
    end_line: u64,
    mut f: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut reader = gzip::open_text_reader(path)?;
    let mut line = Vec::new();
    let mut line_no = 0u64;
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(());
        }
        line_no += 1;
        if line_no < start_line {
            continue;
        }
        if line_no > end_line {
            return Ok(());
        }
        f(&line)?;
    }
}

/// Plain-file equivalent of the indexed byte-range rule: a line belongs to
/// the range holding its first byte.
fn plain_byte_range(
    path: &Path,
    start_byte: u64,
    end_byte: u64,
    mut f: impl FnMut(&[u8]) -> Result<()>,
) -> Result<()> {
    let mut reader = gzip::open_text_reader(path)?;
    let mut line = Vec::new();
    let mut offset = 0u64;
    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            return Ok(());
        }
        let line_start = offset;
        offset += n as u64;
        if line_start >= end_byte {
            return Ok(());
        }
        if line_start >= start_byte {
            f(&line)?;
        }
    }
}

pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

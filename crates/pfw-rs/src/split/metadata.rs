use std::io::BufRead;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::index::Indexer;
use crate::json;
use crate::reader::TraceReader;

const MB: f64 = 1024.0 * 1024.0;

/// Everything the manifest mapper needs to know about one input file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileMetadata {
    pub file_path: PathBuf,
    /// Sidecar path for compressed inputs; `None` for plain text.
    pub index_path: Option<PathBuf>,
    /// Uncompressed size in MiB.
    pub size_mb: f64,
    /// 1-based, inclusive; `start_line > end_line` means an empty file.
    pub start_line: u64,
    pub end_line: u64,
    /// Lines that pass JSON validation.
    pub valid_events: u64,
    /// Uncompressed MiB per line, the mapper's fill unit.
    pub size_per_line: f64,
    pub success: bool,
    pub error: Option<String>,
}

impl FileMetadata {
    fn failed(file_path: &Path, index_path: Option<PathBuf>, error: String) -> FileMetadata {
        FileMetadata {
            file_path: file_path.to_path_buf(),
            index_path,
            size_mb: 0.0,
            start_line: 1,
            end_line: 0,
            valid_events: 0,
            size_per_line: 0.0,
            success: false,
            error: Some(error),
        }
    }

    pub fn total_lines(&self) -> u64 {
        if self.end_line >= self.start_line {
            self.end_line - self.start_line + 1
        } else {
            0
        }
    }
}

/// Collect metadata for one input file. Failures are reported in the record
/// rather than raised so the driver can drop the file and keep going.
pub fn collect_metadata(
    file_path: &Path,
    index_path: Option<&Path>,
    checkpoint_size: u64,
    force_rebuild: bool,
) -> FileMetadata {
    let compressed = is_gzip_path(file_path);
    let index_path = if compressed {
        Some(
            index_path
                .map(Path::to_path_buf)
                .unwrap_or_else(|| default_index_path(file_path)),
        )
    } else {
        None
    };

    let outcome = match index_path.as_deref() {
        Some(idx) => collect_compressed(file_path, idx, checkpoint_size, force_rebuild),
        None => collect_plain(file_path),
    };

    match outcome {
        Ok(meta) => meta,
        Err(e) => {
            warn!("metadata collection failed for {}: {}", file_path.display(), e);
            FileMetadata::failed(file_path, index_path, e.to_string())
        }
    }
}

pub fn is_gzip_path(path: &Path) -> bool {
    path.extension().map(|e| e == "gz").unwrap_or(false)
}

/// Sidecar next to the archive unless the caller routes it elsewhere.
pub fn default_index_path(file_path: &Path) -> PathBuf {
    PathBuf::from(format!("{}.idx", file_path.display()))
}

fn collect_compressed(
    file_path: &Path,
    index_path: &Path,
    checkpoint_size: u64,
    force_rebuild: bool,
) -> Result<FileMetadata> {
    Indexer::new(file_path, index_path)
        .checkpoint_size(checkpoint_size)
        .force_rebuild(force_rebuild)
        .ensure()?;

    let reader = TraceReader::open(file_path, index_path)?;
    let total_lines = reader.num_lines();
    let size_mb = reader.max_bytes() as f64 / MB;

    // Count valid events explicitly rather than assuming the first and last
    // lines are the only delimiters.
    let mut valid_events = 0u64;
    if total_lines > 0 {
        let mut lines = reader.line_iter(1, total_lines)?;
        while let Some(line) = lines.next_line()? {
            if json::trim_and_validate(line).is_some() {
                valid_events += 1;
            }
        }
    }

    let size_per_line = if total_lines > 0 {
        size_mb / total_lines as f64
    } else {
        0.0
    };
    debug!(
        "{}: {:.2} MiB uncompressed, {} lines, {} valid events",
        file_path.display(),
        size_mb,
        total_lines,
        valid_events
    );

    Ok(FileMetadata {
        file_path: file_path.to_path_buf(),
        index_path: Some(index_path.to_path_buf()),
        size_mb,
        start_line: 1,
        end_line: total_lines,
        valid_events,
        size_per_line,
        success: true,
        error: None,
    })
}

fn collect_plain(file_path: &Path) -> Result<FileMetadata> {
    let mut reader = crate::gzip::open_text_reader(file_path)?;
    let mut total_lines = 0u64;
    let mut total_bytes = 0u64;
    let mut valid_events = 0u64;
    let mut line = Vec::new();

    loop {
        line.clear();
        let n = reader.read_until(b'\n', &mut line)?;
        if n == 0 {
            break;
        }
        total_lines += 1;
        total_bytes += n as u64;
        if json::trim_and_validate(&line).is_some() {
            valid_events += 1;
        }
    }

    let size_mb = total_bytes as f64 / MB;
    let size_per_line = if total_lines > 0 {
        size_mb / total_lines as f64
    } else {
        0.0
    };

    Ok(FileMetadata {
        file_path: file_path.to_path_buf(),
        index_path: None,
        size_mb,
        start_line: 1,
        end_line: total_lines,
        valid_events,
        size_per_line,
        success: true,
        error: None,
    })
}

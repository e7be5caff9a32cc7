use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};

use super::metadata::FileMetadata;

const MB: f64 = 1024.0 * 1024.0;

/// One contiguous region of one input file. Line numbers are authoritative;
/// byte offsets are uniform-density seek hints that stream-level line
/// alignment corrects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChunkSpec {
    pub file_path: PathBuf,
    pub index_path: Option<PathBuf>,
    pub start_byte: u64,
    pub end_byte: u64,
    /// 1-based, inclusive. Zero means no line info (byte hints only).
    pub start_line: u64,
    pub end_line: u64,
    pub size_mb: f64,
}

impl ChunkSpec {
    pub fn has_line_info(&self) -> bool {
        self.start_line > 0 && self.end_line >= self.start_line
    }

    pub fn num_lines(&self) -> u64 {
        if self.has_line_info() {
            self.end_line - self.start_line + 1
        } else {
            0
        }
    }
}

/// Ordered specs whose union is one output chunk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChunkManifest {
    pub specs: Vec<ChunkSpec>,
    pub total_size_mb: f64,
}

impl ChunkManifest {
    fn push(&mut self, spec: ChunkSpec) {
        self.total_size_mb += spec.size_mb;
        self.specs.push(spec);
    }

    pub fn total_lines(&self) -> u64 {
        self.specs.iter().map(ChunkSpec::num_lines).sum()
    }
}

/// Partition the logical line space of the inputs into chunk manifests of
/// roughly `target_chunk_mb` each.
///
/// Guarantees: specs appear in input-file order and a file is never
/// reordered across chunks; for every file the emitted line ranges tile
/// `[start_line, end_line]` with no gaps or overlaps; no manifest is empty;
/// the mapping is deterministic.
pub fn map_manifests(
    metadata: &[FileMetadata],
    target_chunk_mb: f64,
) -> Result<Vec<ChunkManifest>> {
    if !(target_chunk_mb > 0.0) {
        return Err(TraceError::InvalidArgument(format!(
            "chunk size must be positive, got {}",
            target_chunk_mb
        )));
    }

    let mut manifests: Vec<ChunkManifest> = Vec::new();
    let mut current = ChunkManifest::default();

    for file in metadata {
        if !file.success || file.size_mb <= 0.0 || file.total_lines() == 0 {
            continue;
        }
        let total_lines = file.total_lines();
        let size_per_line = if file.size_per_line > 0.0 {
            file.size_per_line
        } else {
            file.size_mb / total_lines as f64
        };
        let bytes_per_line = file.size_mb * MB / total_lines as f64;

        let mut cursor = file.start_line;
        while cursor <= file.end_line {
            let room = target_chunk_mb - current.total_size_mb;
            if room <= 0.0 {
                manifests.push(std::mem::take(&mut current));
                continue;
            }

            let remaining = file.end_line - cursor + 1;
            let by_room = (room / size_per_line).round() as u64;
            let lines = by_room.clamp(1, remaining);
            let line_end = cursor + lines - 1;

            let start_byte = ((cursor - file.start_line) as f64 * bytes_per_line) as u64;
            let end_byte = ((line_end - file.start_line + 1) as f64 * bytes_per_line) as u64;

            current.push(ChunkSpec {
                file_path: file.file_path.clone(),
                index_path: file.index_path.clone(),
                start_byte,
                end_byte,
                start_line: cursor,
                end_line: line_end,
                size_mb: lines as f64 * size_per_line,
            });
            cursor = line_end + 1;

            if current.total_size_mb >= target_chunk_mb {
                manifests.push(std::mem::take(&mut current));
            }
        }
    }

    if !current.specs.is_empty() {
        manifests.push(current);
    }
    Ok(manifests)
}

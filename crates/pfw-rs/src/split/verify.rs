use std::io::BufRead;

use log::{debug, info};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, TraceError};
use crate::gzip;
use crate::json::{self, EventId};
use crate::reader::TraceReader;

use super::extract::ChunkResult;
use super::metadata::FileMetadata;

/// Outcome of comparing the event multisets on both sides of the split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verification {
    pub passed: bool,
    pub input_hash: u64,
    pub output_hash: u64,
}

/// Content hash of an event multiset: sort by `(id, pid, tid)`, hash the
/// serialized triples, keep 64 bits. Sorting first makes the hash immune to
/// extractor reordering across chunks.
pub fn hash_events(mut events: Vec<EventId>) -> u64 {
    events.sort_unstable();
    let mut hasher = Sha256::new();
    for event in &events {
        hasher.update(event.id.to_le_bytes());
        hasher.update(event.pid.to_le_bytes());
        hasher.update(event.tid.to_le_bytes());
    }
    let digest = hasher.finalize();
    u64::from_le_bytes(digest[..8].try_into().expect("digest holds 8 bytes"))
}

/// Re-read the inputs and gather every valid event identity.
pub fn collect_input_events(metadata: &[FileMetadata]) -> Result<Vec<EventId>> {
    let mut events = Vec::new();
    for file in metadata {
        if !file.success {
            debug!("verification skips failed input {}", file.file_path.display());
            continue;
        }
        if file.total_lines() == 0 {
            continue;
        }
        match &file.index_path {
            Some(index_path) => {
                let reader = TraceReader::open(&file.file_path, index_path)
                    .map_err(|e| e.in_task("verify/collect-input"))?;
                let mut lines = reader.line_iter(file.start_line, file.end_line)?;
                while let Some(line) = lines.next_line()? {
                    push_valid_event(line, &mut events);
                }
            }
            None => {
                let mut reader = gzip::open_text_reader(&file.file_path)?;
                let mut line = Vec::new();
                loop {
                    line.clear();
                    if reader.read_until(b'\n', &mut line)? == 0 {
                        break;
                    }
                    push_valid_event(&line, &mut events);
                }
            }
        }
    }
    Ok(events)
}

/// Re-read the produced chunks and gather every valid event identity.
/// Reading the files (rather than reusing the extractor's in-memory ids)
/// means post-extraction corruption is caught too.
pub fn collect_output_events(results: &[ChunkResult]) -> Result<Vec<EventId>> {
    let mut events = Vec::new();
    for chunk in results {
        if !chunk.success {
            return Err(TraceError::TaskFailed(
                format!("verify chunk {}", chunk.chunk_index),
                Box::new(TraceError::Corrupt(
                    chunk
                        .error
                        .clone()
                        .unwrap_or_else(|| "chunk extraction failed".to_string()),
                )),
            ));
        }
        let mut reader = gzip::open_text_reader(&chunk.output_path)?;
        let mut line = Vec::new();
        loop {
            line.clear();
            if reader.read_until(b'\n', &mut line)? == 0 {
                break;
            }
            push_valid_event(&line, &mut events);
        }
    }
    Ok(events)
}

fn push_valid_event(line: &[u8], events: &mut Vec<EventId>) {
    if let Some(trimmed) = json::trim_and_validate(line) {
        let id = json::extract_event_id(trimmed);
        if id.is_valid() {
            events.push(id);
        }
    }
}

/// Confirm the output chunks carry exactly the events of the inputs.
pub fn verify_chunks(metadata: &[FileMetadata], results: &[ChunkResult]) -> Result<Verification> {
    let input_hash = hash_events(collect_input_events(metadata)?);
    let output_hash = hash_events(collect_output_events(results)?);
    let passed = input_hash == output_hash;
    if passed {
        info!("verification passed: {:016x}", input_hash);
    } else {
        info!(
            "verification FAILED: input {:016x} != output {:016x}",
            input_hash, output_hash
        );
    }
    Ok(Verification {
        passed,
        input_hash,
        output_hash,
    })
}

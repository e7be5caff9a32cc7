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

//! The split pipeline: directory scan, parallel per-file metadata, a
//! sequential manifest mapping, parallel chunk extraction, and optional
//! verification.
//!
//! Tasks are plain blocking functions run to completion on a bounded rayon
//! pool. Extraction results are re-sorted by chunk index at the join point;
//! everything downstream sees a deterministic order. Index sidecars are one
//! file per archive and are built inside that archive's metadata task, so
//! the store never sees concurrent writers.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use log::info;
use rayon::prelude::*;

use crate::error::{Result, TraceError};
use crate::index::DEFAULT_CHECKPOINT_SIZE;

mod extract;
mod manifest;
mod metadata;
mod verify;

pub use extract::{chunk_output_path, extract_chunk, ChunkResult, ExtractRequest};
pub use manifest::{map_manifests, ChunkManifest, ChunkSpec};
pub use metadata::{collect_metadata, default_index_path, is_gzip_path, FileMetadata};
pub use verify::{
    collect_input_events, collect_output_events, hash_events, verify_chunks, Verification,
};

/// Everything `run_split` needs; mirrors the CLI surface.
#[derive(Debug, Clone)]
pub struct SplitConfig {
    pub app_name: String,
    pub directory: PathBuf,
    pub output_dir: PathBuf,
    pub chunk_size_mb: f64,
    /// Rebuild indexes and overwrite existing outputs.
    pub force: bool,
    pub compress: bool,
    pub checkpoint_size: u64,
    /// Worker threads; 0 means hardware concurrency.
    pub threads: usize,
    /// Where sidecars live; `None` puts each next to its archive.
    pub index_dir: Option<PathBuf>,
    pub verify: bool,
}

impl Default for SplitConfig {
    fn default() -> Self {
        SplitConfig {
            app_name: "app".to_string(),
            directory: PathBuf::from("."),
            output_dir: PathBuf::from("./split"),
            chunk_size_mb: 4.0,
            force: false,
            compress: true,
            checkpoint_size: DEFAULT_CHECKPOINT_SIZE,
            threads: 0,
            index_dir: None,
            verify: false,
        }
    }
}

/// Everything the split produced, in deterministic order.
#[derive(Debug)]
pub struct SplitReport {
    pub metadata: Vec<FileMetadata>,
    pub manifests: Vec<ChunkManifest>,
    pub results: Vec<ChunkResult>,
    pub verification: Option<Verification>,
    pub elapsed: Duration,
}

impl SplitReport {
    /// True when every input file and every chunk succeeded, and
    /// verification (if requested) matched.
    pub fn succeeded(&self) -> bool {
        self.metadata.iter().all(|m| m.success)
            && self.results.iter().all(|r| r.success)
            && self.verification.map_or(true, |v| v.passed)
    }

    pub fn total_events(&self) -> u64 {
        self.results.iter().filter(|r| r.success).map(|r| r.events).sum()
    }
}

/// Sorted list of `.pfw` / `.pfw.gz` files directly under `dir`.
pub fn scan_trace_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|_| {
        TraceError::NotFound(format!("input directory does not exist: {}", dir.display()))
    })?;
    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.ends_with(".pfw") || name.ends_with(".pfw.gz") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Run the whole pipeline.
pub fn run_split(config: &SplitConfig) -> Result<SplitReport> {
    let started = Instant::now();
    if !(config.chunk_size_mb > 0.0) {
        return Err(TraceError::InvalidArgument(format!(
            "chunk size must be positive, got {} MB",
            config.chunk_size_mb
        )));
    }

    let files = scan_trace_files(&config.directory)?;
    if files.is_empty() {
        return Err(TraceError::NotFound(format!(
            "no .pfw or .pfw.gz files in {}",
            config.directory.display()
        )));
    }
    std::fs::create_dir_all(&config.output_dir)?;

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.threads)
        .build()
        .map_err(|e| {
            TraceError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
                .in_task("worker pool")
        })?;

    info!("phase 1: collecting metadata from {} files", files.len());
    let metadata: Vec<FileMetadata> = pool.install(|| {
        files
            .par_iter()
            .map(|file| {
                let index_path = index_path_for(config, file);
                collect_metadata(
                    file,
                    index_path.as_deref(),
                    config.checkpoint_size,
                    config.force,
                )
            })
            .collect()
    });
    let usable = metadata.iter().filter(|m| m.success).count();
    info!(
        "collected metadata from {}/{} files",
        usable,
        metadata.len()
    );

    info!("phase 2: mapping chunk manifests");
    let manifests = map_manifests(&metadata, config.chunk_size_mb)?;
    info!("mapped {} chunks", manifests.len());

    info!("phase 3: extracting {} chunks", manifests.len());
    let mut results: Vec<ChunkResult> = pool.install(|| {
        manifests
            .par_iter()
            .enumerate()
            .map(|(i, manifest)| {
                extract_chunk(&ExtractRequest {
                    chunk_index: i + 1,
                    manifest,
                    output_dir: &config.output_dir,
                    app_name: &config.app_name,
                    compress: config.compress,
                    overwrite: config.force,
                    collect_event_ids: config.verify,
                })
            })
            .collect()
    });
    // Extraction order is unspecified; downstream consumers get chunk order.
    results.sort_by_key(|r| r.chunk_index);

    let verification = if config.verify {
        if results.iter().all(|r| r.success) {
            Some(verify_chunks(&metadata, &results).map_err(|e| e.in_task("verify"))?)
        } else {
            // The split already failed; verification declines to run.
            info!("skipping verification: not every chunk succeeded");
            None
        }
    } else {
        None
    };

    Ok(SplitReport {
        metadata,
        manifests,
        results,
        verification,
        elapsed: started.elapsed(),
    })
}

fn index_path_for(config: &SplitConfig, file: &Path) -> Option<PathBuf> {
    if !is_gzip_path(file) {
        return None;
    }
    match &config.index_dir {
        Some(dir) => {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "trace".to_string());
            Some(dir.join(format!("{}.idx", name)))
        }
        None => Some(default_index_path(file)),
    }
}

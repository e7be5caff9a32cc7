//! One-shot gzip helpers for whole files: compressing finished chunk output
//! in place and streaming text back out of `.gz` files for verification.

use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::{Result, TraceError};

/// Gzip `path` into `path.gz` next to it, then remove the original.
/// The compressed file is staged in the same directory and renamed into
/// place so readers never observe a partial `.gz`.
pub fn compress_file_in_place(path: &Path) -> Result<PathBuf> {
    let parent = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let gz_path = PathBuf::from(format!("{}.gz", path.display()));

    let mut input = BufReader::new(File::open(path)?);
    let staged = tempfile::NamedTempFile::new_in(&parent)?;
    let mut encoder = GzEncoder::new(BufWriter::new(staged), Compression::default());
    io::copy(&mut input, &mut encoder)?;
    let staged = encoder
        .finish()?
        .into_inner()
        .map_err(|e| TraceError::Io(e.into_error()))?;
    staged
        .persist(&gz_path)
        .map_err(|e| TraceError::Io(e.error))?;

    std::fs::remove_file(path)?;
    Ok(gz_path)
}

/// Open `path` for buffered line reading, transparently gunzipping when the
/// name ends in `.gz`.
pub fn open_text_reader(path: &Path) -> Result<Box<dyn BufRead>> {
    let file = File::open(path)?;
    if path.extension().map(|e| e == "gz").unwrap_or(false) {
        Ok(Box::new(BufReader::new(GzDecoder::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

/// Deflate-compress a checkpoint window for sidecar storage.
pub fn compress_window(window: &[u8]) -> Result<Vec<u8>> {
    let mut encoder =
        flate2::write::ZlibEncoder::new(Vec::new(), Compression::best());
    encoder.write_all(window)?;
    Ok(encoder.finish()?)
}

/// Inverse of [`compress_window`].
pub fn decompress_window(blob: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = flate2::read::ZlibDecoder::new(blob);
    let mut window = Vec::with_capacity(crate::inflate::WINDOW_SIZE);
    io::Read::read_to_end(&mut decoder, &mut window)
        .map_err(|e| TraceError::Corrupt(format!("checkpoint window corrupt: {}", e)))?;
    Ok(window)
}

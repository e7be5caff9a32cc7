use std::io::BufRead;
use std::path::{Path, PathBuf};

use anyhow::Result;

use pfw_rs::error::TraceError;
use pfw_rs::json::{self, EventId};
use pfw_rs::reader::TraceReader;
use pfw_rs::split::{run_split, verify_chunks, SplitConfig, SplitReport};
use pfw_rs::test_helpers::{trace_body, write_trace_gz};

const CKPT: u64 = 128 * 1024;
const MB: f64 = 1024.0 * 1024.0;

fn config(input: &Path, output: &Path) -> SplitConfig {
    SplitConfig {
        app_name: "app".to_string(),
        directory: input.to_path_buf(),
        output_dir: output.to_path_buf(),
        chunk_size_mb: 1.0,
        force: false,
        compress: true,
        checkpoint_size: CKPT,
        threads: 4,
        index_dir: None,
        verify: true,
    }
}

/// Every valid event identity in one output chunk, by re-reading the file.
fn read_chunk_events(path: &Path) -> Result<Vec<EventId>> {
    let mut reader = pfw_rs::gzip::open_text_reader(path)?;
    let mut events = Vec::new();
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        if let Some(trimmed) = json::trim_and_validate(&line) {
            let id = json::extract_event_id(trimmed);
            if id.is_valid() {
                events.push(id);
            }
        }
    }
    Ok(events)
}

fn all_output_events(report: &SplitReport) -> Result<Vec<EventId>> {
    let mut events = Vec::new();
    for chunk in &report.results {
        events.extend(read_chunk_events(&chunk.output_path)?);
    }
    events.sort();
    Ok(events)
}

#[test]
fn tiny_archive_single_chunk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    write_trace_gz(&input.join("tiny.pfw.gz"), 8)?;

    let mut cfg = config(&input, &output);
    cfg.app_name = "tiny".to_string();
    let report = run_split(&cfg)?;

    assert!(report.succeeded());
    assert_eq!(report.results.len(), 1);
    let chunk = &report.results[0];
    assert_eq!(chunk.chunk_index, 1);
    assert_eq!(chunk.events, 8);
    assert_eq!(chunk.output_path, output.join("tiny-1.pfw.gz"));
    assert!(chunk.output_path.exists());
    assert!(report.verification.expect("verify requested").passed);

    // The chunk is itself a well-formed one-event-per-line JSON array.
    let events = read_chunk_events(&chunk.output_path)?;
    assert_eq!(events.len(), 8);
    Ok(())
}

#[test]
fn split_across_files_bridges_chunks() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;

    // Sizes in ratio 2:3:5 with a target of 40% of the total, the shape of a
    // (2, 3, 5) MiB input at 4 MiB chunks.
    let a = write_trace_gz(&input.join("a.pfw.gz"), 4000)?;
    let b = write_trace_gz(&input.join("b.pfw.gz"), 6000)?;
    let c = write_trace_gz(&input.join("c.pfw.gz"), 10000)?;
    let total_mb = (a.len() + b.len() + c.len()) as f64 / MB;

    let mut cfg = config(&input, &output);
    cfg.chunk_size_mb = total_mb * 0.4;
    let report = run_split(&cfg)?;

    assert!(report.succeeded());
    assert_eq!(report.results.len(), 3);
    assert!(report.verification.expect("verify requested").passed);

    // The middle chunk holds the tail of b and the head of c.
    let middle_files: Vec<PathBuf> = report.manifests[1]
        .specs
        .iter()
        .map(|s| s.file_path.clone())
        .collect();
    assert!(middle_files.contains(&input.join("b.pfw.gz")));
    assert!(middle_files.contains(&input.join("c.pfw.gz")));

    // Manifest coverage: every file's line space is tiled exactly.
    for (name, events) in [("a.pfw.gz", 4000u64), ("b.pfw.gz", 6000), ("c.pfw.gz", 10000)] {
        let ranges: Vec<(u64, u64)> = report
            .manifests
            .iter()
            .flat_map(|m| m.specs.iter())
            .filter(|s| s.file_path == input.join(name))
            .map(|s| (s.start_line, s.end_line))
            .collect();
        assert_eq!(ranges.first().unwrap().0, 1);
        assert_eq!(ranges.last().unwrap().1, events + 2);
        for pair in ranges.windows(2) {
            assert_eq!(pair[1].0, pair[0].1 + 1);
        }
    }

    // Every event lands in exactly one chunk.
    let mut expected: Vec<EventId> = Vec::new();
    for count in [4000i64, 6000, 10000] {
        for i in 0..count {
            expected.push(EventId {
                id: i,
                pid: 1000 + i % 7,
                tid: 2000 + i % 13,
            });
        }
    }
    expected.sort();
    assert_eq!(all_output_events(&report)?, expected);
    Ok(())
}

#[test]
fn parallel_extraction_partitions_events() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    let body = write_trace_gz(&input.join("big.pfw.gz"), 20000)?;

    let mut cfg = config(&input, &output);
    cfg.threads = 8;
    cfg.chunk_size_mb = body.len() as f64 / MB / 10.0;
    let report = run_split(&cfg)?;

    assert!(report.succeeded());
    assert!(
        (9..=11).contains(&report.results.len()),
        "expected about 10 chunks, got {}",
        report.results.len()
    );
    assert!(report.verification.expect("verify requested").passed);

    // Results arrive sorted by chunk index, 1-based and contiguous.
    for (i, chunk) in report.results.iter().enumerate() {
        assert_eq!(chunk.chunk_index, i + 1);
        assert!(chunk.success);
    }

    let got = all_output_events(&report)?;
    assert_eq!(got.len(), 20000, "every event in exactly one chunk");
    let mut ids: Vec<i64> = got.iter().map(|e| e.id).collect();
    ids.dedup();
    assert_eq!(ids.len(), 20000, "no event duplicated across chunks");
    Ok(())
}

#[test]
fn corrupt_input_fails_that_file_only() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    write_trace_gz(&input.join("good.pfw.gz"), 2000)?;
    write_trace_gz(&input.join("bad.pfw.gz"), 2000)?;

    let bad = input.join("bad.pfw.gz");
    let mut bytes = std::fs::read(&bad)?;
    let len = bytes.len();
    bytes.truncate(len - 100);
    std::fs::write(&bad, &bytes)?;

    let report = run_split(&config(&input, &output))?;

    // The corrupt file is dropped, the good one still splits and verifies.
    assert!(!report.succeeded());
    let bad_meta = report
        .metadata
        .iter()
        .find(|m| m.file_path == bad)
        .expect("bad file reported");
    assert!(!bad_meta.success);
    assert!(bad_meta.error.is_some());
    assert!(report.results.iter().all(|r| r.success));
    assert!(report.verification.expect("verify requested").passed);
    assert_eq!(all_output_events(&report)?.len(), 2000);
    Ok(())
}

#[test]
fn stale_index_detected_and_rebuilt_with_force() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    let index_dir = dir.path().join("idx");
    std::fs::create_dir_all(&input)?;
    let archive = input.join("t.pfw.gz");
    write_trace_gz(&archive, 500)?;

    let mut cfg = config(&input, &output);
    cfg.index_dir = Some(index_dir.clone());
    let report = run_split(&cfg)?;
    assert!(report.succeeded());

    // Touch the archive: the sidecar no longer matches.
    let file = std::fs::OpenOptions::new().write(true).open(&archive)?;
    file.set_modified(std::time::UNIX_EPOCH + std::time::Duration::from_secs(2_000_000))?;
    drop(file);

    let index_path = index_dir.join("t.pfw.gz.idx");
    let err = TraceReader::open(&archive, &index_path).unwrap_err();
    assert!(err.is_stale(), "got {err}");

    // Force rebuilds the index and the outputs.
    let mut cfg = config(&input, &output);
    cfg.index_dir = Some(index_dir);
    cfg.force = true;
    let report = run_split(&cfg)?;
    assert!(report.succeeded());
    assert!(TraceReader::open(&archive, &index_path).is_ok());
    Ok(())
}

#[test]
fn outputs_not_overwritten_without_force() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    write_trace_gz(&input.join("t.pfw.gz"), 100)?;

    let cfg = config(&input, &output);
    assert!(run_split(&cfg)?.succeeded());
    // Second run without force refuses to clobber the chunks.
    let report = run_split(&cfg)?;
    assert!(!report.succeeded());
    assert!(report.results.iter().any(|r| !r.success));

    let mut cfg = config(&input, &output);
    cfg.force = true;
    assert!(run_split(&cfg)?.succeeded());
    Ok(())
}

#[test]
fn verification_mismatch_on_tampered_chunk() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    write_trace_gz(&input.join("t.pfw.gz"), 300)?;

    let mut cfg = config(&input, &output);
    cfg.compress = false;
    cfg.verify = false;
    let report = run_split(&cfg)?;
    assert!(report.succeeded());

    // Flip one event identity in the output.
    let chunk_path = &report.results[0].output_path;
    let text = std::fs::read_to_string(chunk_path)?;
    let tampered = text.replacen("\"id\":3,", "\"id\":777777,", 1);
    assert_ne!(text, tampered, "tamper target must exist");
    std::fs::write(chunk_path, tampered)?;

    let verification = verify_chunks(&report.metadata, &report.results)?;
    assert!(!verification.passed);
    assert_ne!(verification.input_hash, verification.output_hash);
    Ok(())
}

#[test]
fn plain_text_inputs_split_and_verify() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    std::fs::write(input.join("plain.pfw"), trace_body(1200))?;

    let report = run_split(&config(&input, &output))?;
    assert!(report.succeeded());
    assert!(report.verification.expect("verify requested").passed);
    assert_eq!(all_output_events(&report)?.len(), 1200);
    // Plain inputs carry no index sidecar.
    assert!(report.metadata.iter().all(|m| m.index_path.is_none()));
    Ok(())
}

#[test]
fn split_is_deterministic() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    write_trace_gz(&input.join("a.pfw.gz"), 3000)?;
    write_trace_gz(&input.join("b.pfw.gz"), 1000)?;

    let mut cfg = config(&input, &output);
    cfg.compress = false;
    cfg.verify = false;
    let first = run_split(&cfg)?;
    let first_bytes: Vec<Vec<u8>> = first
        .results
        .iter()
        .map(|r| std::fs::read(&r.output_path))
        .collect::<std::io::Result<_>>()?;

    cfg.force = true;
    let second = run_split(&cfg)?;
    assert_eq!(first.manifests, second.manifests);
    for (chunk, bytes) in second.results.iter().zip(&first_bytes) {
        assert_eq!(&std::fs::read(&chunk.output_path)?, bytes);
    }
    Ok(())
}

#[test]
fn chunk_digest_tracks_content() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    let output = dir.path().join("out");
    std::fs::create_dir_all(&input)?;
    write_trace_gz(&input.join("t.pfw.gz"), 64)?;

    let mut cfg = config(&input, &output);
    cfg.compress = false;
    let report = run_split(&cfg)?;
    let digest = report.results[0]
        .content_digest
        .clone()
        .expect("digest reported");

    cfg.force = true;
    let again = run_split(&cfg)?;
    assert_eq!(again.results[0].content_digest.as_deref(), Some(digest.as_str()));
    Ok(())
}

#[test]
fn empty_directory_is_not_found() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    std::fs::create_dir_all(&input)?;
    let err = run_split(&config(&input, &dir.path().join("out"))).unwrap_err();
    assert!(matches!(err, TraceError::NotFound(_)), "got {err}");
    Ok(())
}

#[test]
fn non_positive_chunk_size_is_rejected() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let input = dir.path().join("in");
    std::fs::create_dir_all(&input)?;
    write_trace_gz(&input.join("t.pfw.gz"), 10)?;

    let mut cfg = config(&input, &dir.path().join("out"));
    cfg.chunk_size_mb = 0.0;
    let err = run_split(&cfg).unwrap_err();
    assert!(matches!(err, TraceError::InvalidArgument(_)), "got {err}");
    Ok(())
}

#[test]
fn gzip_compress_in_place_roundtrip() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chunk.pfw");
    let body = trace_body(100);
    std::fs::write(&path, &body)?;

    let gz = pfw_rs::gzip::compress_file_in_place(&path)?;
    assert!(!path.exists(), "plain file removed after compression");
    assert_eq!(gz, dir.path().join("chunk.pfw.gz"));

    let mut reader = pfw_rs::gzip::open_text_reader(&gz)?;
    let mut back = String::new();
    std::io::Read::read_to_string(&mut reader, &mut back)?;
    assert_eq!(back, body);
    Ok(())
}

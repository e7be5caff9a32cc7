use anyhow::Result;

use pfw_rs::error::TraceError;
use pfw_rs::index::Indexer;
use pfw_rs::reader::{RangeKind, StreamConfig, StreamKind, TraceReader};
use pfw_rs::test_helpers::{body_lines, write_trace_gz};

const CKPT: u64 = 64 * 1024;

fn fixture(events: usize) -> Result<(tempfile::TempDir, TraceReader, String)> {
    let dir = tempfile::tempdir()?;
    let gz = dir.path().join("trace.pfw.gz");
    let idx = dir.path().join("trace.pfw.gz.idx");
    let body = write_trace_gz(&gz, events)?;
    Indexer::new(&gz, &idx).checkpoint_size(CKPT).build()?;
    let reader = TraceReader::open(&gz, &idx)?;
    Ok((dir, reader, body))
}

fn drain(reader: &TraceReader, config: &StreamConfig, buf_size: usize) -> Result<Vec<u8>> {
    let mut stream = reader.stream(config)?;
    let mut out = Vec::new();
    let mut buf = vec![0u8; buf_size];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            assert!(stream.done());
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}

/// The lines attributed to `[start, end)`: every line whose first byte lies
/// in the range, delivered whole.
fn expected_line_bytes(body: &str, start: usize, end: usize) -> Vec<u8> {
    let mut out = Vec::new();
    for line in body_lines(body) {
        let s = line.as_ptr() as usize - body.as_ptr() as usize;
        if s >= start && s < end {
            out.extend_from_slice(line.as_bytes());
        }
    }
    out
}

#[test]
fn bytes_stream_matches_slices() -> Result<()> {
    let (_dir, reader, body) = fixture(3000)?;
    let max = body.len() as u64;

    for (a, b) in [
        (0u64, max),
        (0, 1),
        (17, 40_017),
        (100_000, 100_001),
        (max - 1, max),
        (max / 3, 2 * max / 3),
    ] {
        let config = StreamConfig::new()
            .kind(StreamKind::Bytes)
            .range(RangeKind::ByteRange)
            .from(a)
            .to(b);
        let got = drain(&reader, &config, 8192)?;
        assert_eq!(got, body.as_bytes()[a as usize..b as usize], "range {a}..{b}");
    }
    Ok(())
}

#[test]
fn line_bytes_whole_file_is_identity() -> Result<()> {
    let (_dir, reader, body) = fixture(3000)?;
    let config = StreamConfig::new()
        .kind(StreamKind::MultiLinesBytes)
        .range(RangeKind::ByteRange)
        .from(0)
        .to(body.len() as u64);
    let got = drain(&reader, &config, 64 * 1024)?;
    assert_eq!(got, body.as_bytes());
    Ok(())
}

#[test]
fn line_alignment_skips_left_and_expands_right() -> Result<()> {
    let (_dir, reader, body) = fixture(3000)?;
    let max = body.len() as u64;

    // Deliberately misaligned cuts, line-start cuts, and edges.
    let cuts: Vec<(u64, u64)> = vec![
        (1, max),
        (0, 2),
        (3, 57),
        (1000, 250_000),
        (249_999, 250_001),
        (max / 2, max),
        (max - 2, max),
        (2, 2),
    ];
    for (a, b) in cuts {
        for kind in [
            StreamKind::MultiLinesBytes,
            StreamKind::LineBytes,
            StreamKind::Line,
            StreamKind::MultiLines,
        ] {
            let config = StreamConfig::new()
                .kind(kind)
                .range(RangeKind::ByteRange)
                .from(a)
                .to(b);
            let got = drain(&reader, &config, 64 * 1024)?;
            assert_eq!(
                got,
                expected_line_bytes(&body, a as usize, b as usize),
                "kind {kind:?} range {a}..{b}"
            );
        }
    }
    Ok(())
}

#[test]
fn every_read_ends_on_a_newline() -> Result<()> {
    let (_dir, reader, body) = fixture(2000)?;
    let config = StreamConfig::new()
        .kind(StreamKind::MultiLinesBytes)
        .range(RangeKind::ByteRange)
        .from(11)
        .to(body.len() as u64 - 7);
    let mut stream = reader.stream(&config)?;
    let mut buf = vec![0u8; 4096];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        assert_eq!(buf[n - 1], b'\n', "chunk must end at a line boundary");
    }
    Ok(())
}

#[test]
fn partition_reassembles_exactly() -> Result<()> {
    let (_dir, reader, body) = fixture(4000)?;
    let max = body.len() as u64;

    // Uneven cut points, none line-aligned on purpose.
    let cuts = [0, 13, 90_001, 90_002, max / 2 + 7, max - 19, max];
    let mut assembled = Vec::new();
    for pair in cuts.windows(2) {
        let config = StreamConfig::new()
            .kind(StreamKind::MultiLinesBytes)
            .range(RangeKind::ByteRange)
            .from(pair[0])
            .to(pair[1]);
        assembled.extend(drain(&reader, &config, 32 * 1024)?);
    }
    assert_eq!(assembled, body.as_bytes());
    Ok(())
}

#[test]
fn concurrent_partition_matches_sequential() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let gz = dir.path().join("trace.pfw.gz");
    let idx = dir.path().join("trace.pfw.gz.idx");
    let body = write_trace_gz(&gz, 6000)?;
    Indexer::new(&gz, &idx).checkpoint_size(CKPT).build()?;
    let max = body.len() as u64;

    for workers in [1u64, 2, 4, 8, 16] {
        let mut handles = Vec::new();
        for w in 0..workers {
            let gz = gz.clone();
            let idx = idx.clone();
            let start = max * w / workers;
            let end = max * (w + 1) / workers;
            handles.push(std::thread::spawn(move || -> Result<Vec<u8>> {
                // Every worker opens its own reader and decompressor.
                let reader = TraceReader::open(&gz, &idx)?;
                let config = StreamConfig::new()
                    .kind(StreamKind::MultiLinesBytes)
                    .range(RangeKind::ByteRange)
                    .from(start)
                    .to(end);
                drain(&reader, &config, 16 * 1024)
            }));
        }
        let mut assembled = Vec::new();
        for handle in handles {
            assembled.extend(handle.join().expect("worker panicked")?);
        }
        assert_eq!(assembled, body.as_bytes(), "{workers} workers");
    }
    Ok(())
}

#[test]
fn line_range_yields_exact_lines() -> Result<()> {
    let (_dir, reader, body) = fixture(4000)?;
    let lines = body_lines(&body);
    let n = lines.len() as u64;
    assert_eq!(reader.num_lines(), n);

    for (a, b) in [(1u64, n), (1, 1), (n, n), (2, 2), (500, 3500), (3999, n)] {
        let config = StreamConfig::new()
            .kind(StreamKind::MultiLines)
            .range(RangeKind::LineRange)
            .from(a)
            .to(b);
        let got = drain(&reader, &config, 64 * 1024)?;
        let expected: Vec<u8> = lines[(a - 1) as usize..b as usize]
            .iter()
            .flat_map(|l| l.bytes())
            .collect();
        assert_eq!(got, expected, "lines {a}..={b}");
    }
    Ok(())
}

#[test]
fn single_line_stream_emits_one_line_per_read() -> Result<()> {
    let (_dir, reader, body) = fixture(300)?;
    let lines = body_lines(&body);

    let config = StreamConfig::new()
        .kind(StreamKind::Line)
        .range(RangeKind::LineRange)
        .from(5)
        .to(25);
    let mut stream = reader.stream(&config)?;
    let mut buf = vec![0u8; 64 * 1024];
    let mut seen = Vec::new();
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        // One complete line per call.
        assert_eq!(buf[n - 1], b'\n');
        assert_eq!(buf[..n].iter().filter(|&&b| b == b'\n').count(), 1);
        seen.push(String::from_utf8(buf[..n].to_vec())?);
    }
    assert_eq!(seen.len(), 21);
    for (i, line) in seen.iter().enumerate() {
        assert_eq!(line.as_bytes(), lines[4 + i].as_bytes());
    }
    Ok(())
}

#[test]
fn line_iter_matches_body() -> Result<()> {
    let (_dir, reader, body) = fixture(1000)?;
    let lines = body_lines(&body);

    let mut iter = reader.line_iter(10, 200)?;
    let mut i = 9usize;
    while let Some(line) = iter.next_line()? {
        assert_eq!(line, lines[i].as_bytes());
        i += 1;
    }
    assert_eq!(i, 200);
    Ok(())
}

#[test]
fn tiny_caller_buffer_retains_state() -> Result<()> {
    let (_dir, reader, body) = fixture(500)?;
    let max = body.len() as u64;

    for kind in [
        StreamKind::Bytes,
        StreamKind::MultiLinesBytes,
        StreamKind::LineBytes,
        StreamKind::MultiLines,
    ] {
        let config = StreamConfig::new()
            .kind(kind)
            .range(RangeKind::ByteRange)
            .from(7)
            .to(max - 3);
        // An 8-byte buffer is far smaller than any line.
        let got = drain(&reader, &config, 8)?;
        let expected = match kind {
            StreamKind::Bytes => body.as_bytes()[7..(max - 3) as usize].to_vec(),
            _ => expected_line_bytes(&body, 7, (max - 3) as usize),
        };
        assert_eq!(got, expected, "kind {kind:?}");
    }
    Ok(())
}

#[test]
fn empty_range_is_done_immediately() -> Result<()> {
    let (_dir, reader, _body) = fixture(100)?;
    let config = StreamConfig::new()
        .kind(StreamKind::Bytes)
        .range(RangeKind::ByteRange)
        .from(500)
        .to(500);
    let mut stream = reader.stream(&config)?;
    let mut buf = [0u8; 64];
    assert_eq!(stream.read(&mut buf)?, 0);
    assert!(stream.done());
    Ok(())
}

#[test]
fn range_validation_errors() -> Result<()> {
    let (_dir, reader, body) = fixture(100)?;
    let max = body.len() as u64;

    let over = StreamConfig::new()
        .kind(StreamKind::Bytes)
        .range(RangeKind::ByteRange)
        .from(0)
        .to(max + 1);
    assert!(matches!(
        reader.stream(&over).unwrap_err(),
        TraceError::OutOfRange(_)
    ));

    let inverted = StreamConfig::new()
        .kind(StreamKind::Bytes)
        .range(RangeKind::ByteRange)
        .from(10)
        .to(5);
    assert!(matches!(
        reader.stream(&inverted).unwrap_err(),
        TraceError::InvalidArgument(_)
    ));

    let zero_line = StreamConfig::new()
        .kind(StreamKind::Line)
        .range(RangeKind::LineRange)
        .from(0)
        .to(5);
    assert!(matches!(
        reader.stream(&zero_line).unwrap_err(),
        TraceError::InvalidArgument(_)
    ));

    let line_over = StreamConfig::new()
        .kind(StreamKind::Line)
        .range(RangeKind::LineRange)
        .from(1)
        .to(reader.num_lines() + 1);
    assert!(matches!(
        reader.stream(&line_over).unwrap_err(),
        TraceError::OutOfRange(_)
    ));

    assert!(matches!(
        reader.line_iter(3, 2).unwrap_err(),
        TraceError::InvalidArgument(_)
    ));
    Ok(())
}

#[test]
fn streams_do_not_offer_reset() -> Result<()> {
    let (_dir, reader, body) = fixture(50)?;
    let config = StreamConfig::new()
        .kind(StreamKind::MultiLinesBytes)
        .range(RangeKind::ByteRange)
        .from(0)
        .to(body.len() as u64);
    let stream = reader.stream(&config)?;
    assert!(!stream.can_reset());
    Ok(())
}

#[test]
fn estimate_lines_is_density_with_headroom() -> Result<()> {
    let (_dir, reader, body) = fixture(1000)?;
    let max = body.len() as u64;

    let whole = reader.estimate_lines_in_range(0, max)?;
    let expected = (reader.num_lines() as f64 * 1.1).ceil() as u64;
    assert_eq!(whole, expected);

    assert_eq!(reader.estimate_lines_in_range(5, 5)?, 0);
    assert!(reader.estimate_lines_in_range(0, max / 2)? > 0);
    assert!(matches!(
        reader.estimate_lines_in_range(0, max + 1).unwrap_err(),
        TraceError::OutOfRange(_)
    ));
    Ok(())
}

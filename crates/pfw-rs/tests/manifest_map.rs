use std::path::PathBuf;

use pfw_rs::error::TraceError;
use pfw_rs::split::{map_manifests, FileMetadata};

fn meta(name: &str, size_mb: f64, lines: u64) -> FileMetadata {
    FileMetadata {
        file_path: PathBuf::from(name),
        index_path: Some(PathBuf::from(format!("{}.idx", name))),
        size_mb,
        start_line: 1,
        end_line: lines,
        valid_events: lines.saturating_sub(2),
        size_per_line: if lines > 0 { size_mb / lines as f64 } else { 0.0 },
        success: true,
        error: None,
    }
}

/// Per-file line coverage across all manifests, in emission order.
fn coverage(manifests: &[pfw_rs::split::ChunkManifest], file: &str) -> Vec<(u64, u64)> {
    manifests
        .iter()
        .flat_map(|m| m.specs.iter())
        .filter(|s| s.file_path == PathBuf::from(file))
        .map(|s| (s.start_line, s.end_line))
        .collect()
}

fn assert_tiles(ranges: &[(u64, u64)], start: u64, end: u64) {
    assert!(!ranges.is_empty());
    assert_eq!(ranges[0].0, start);
    assert_eq!(ranges.last().unwrap().1, end);
    for pair in ranges.windows(2) {
        assert_eq!(pair[1].0, pair[0].1 + 1, "gap or overlap in {ranges:?}");
    }
}

#[test]
fn single_small_file_is_one_chunk() {
    let metadata = vec![meta("a.pfw.gz", 0.5, 10)];
    let manifests = map_manifests(&metadata, 4.0).unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].specs.len(), 1);
    assert_eq!(manifests[0].specs[0].start_line, 1);
    assert_eq!(manifests[0].specs[0].end_line, 10);
}

#[test]
fn files_split_across_chunks_in_order() {
    // 2 + 3 + 5 MiB at 4 MiB per chunk: three chunks, with the middle one
    // holding the tail of file b and the head of file c.
    let metadata = vec![
        meta("a.pfw.gz", 2.0, 2000),
        meta("b.pfw.gz", 3.0, 3000),
        meta("c.pfw.gz", 5.0, 5000),
    ];
    let manifests = map_manifests(&metadata, 4.0).unwrap();
    assert_eq!(manifests.len(), 3);

    // Ordering: specs never jump back to an earlier file.
    let order: Vec<_> = manifests
        .iter()
        .flat_map(|m| m.specs.iter())
        .map(|s| s.file_path.clone())
        .collect();
    let mut seen_last = 0usize;
    let files = ["a.pfw.gz", "b.pfw.gz", "c.pfw.gz"];
    for path in &order {
        let pos = files
            .iter()
            .position(|f| path == &PathBuf::from(f))
            .unwrap();
        assert!(pos >= seen_last, "file order regressed: {order:?}");
        seen_last = pos;
    }

    // The middle chunk bridges b and c.
    let middle: Vec<_> = manifests[1]
        .specs
        .iter()
        .map(|s| s.file_path.clone())
        .collect();
    assert!(middle.contains(&PathBuf::from("b.pfw.gz")));
    assert!(middle.contains(&PathBuf::from("c.pfw.gz")));

    // Completeness per file.
    assert_tiles(&coverage(&manifests, "a.pfw.gz"), 1, 2000);
    assert_tiles(&coverage(&manifests, "b.pfw.gz"), 1, 3000);
    assert_tiles(&coverage(&manifests, "c.pfw.gz"), 1, 5000);

    // Size discipline: every chunk except possibly the last lands near the
    // target, and none is empty.
    for m in &manifests {
        assert!(!m.specs.is_empty());
    }
    for m in &manifests[..manifests.len() - 1] {
        assert!(m.total_size_mb >= 3.9 && m.total_size_mb <= 4.1, "{}", m.total_size_mb);
    }
}

#[test]
fn failed_and_empty_files_are_skipped() {
    let mut bad = meta("bad.pfw.gz", 1.0, 100);
    bad.success = false;
    let empty = meta("empty.pfw.gz", 0.0, 0);
    let metadata = vec![bad, empty, meta("ok.pfw.gz", 1.0, 100)];

    let manifests = map_manifests(&metadata, 4.0).unwrap();
    assert_eq!(manifests.len(), 1);
    assert_eq!(manifests[0].specs.len(), 1);
    assert_eq!(manifests[0].specs[0].file_path, PathBuf::from("ok.pfw.gz"));
}

#[test]
fn byte_hints_follow_uniform_density() {
    let metadata = vec![meta("a.pfw.gz", 8.0, 8000)];
    let manifests = map_manifests(&metadata, 4.0).unwrap();
    assert_eq!(manifests.len(), 2);

    let first = &manifests[0].specs[0];
    let second = &manifests[1].specs[0];
    assert_eq!(first.start_byte, 0);
    // Adjacent specs meet exactly in the byte hints too.
    assert_eq!(first.end_byte, second.start_byte);
    // Hints are uniform-density approximations; allow a rounding byte.
    let full = 8u64 * 1024 * 1024;
    assert!(second.end_byte.abs_diff(full) <= 1, "{}", second.end_byte);
    assert_eq!(first.end_line + 1, second.start_line);
}

#[test]
fn mapping_is_deterministic() {
    let metadata = vec![
        meta("a.pfw.gz", 2.3, 1777),
        meta("b.pfw.gz", 7.9, 4211),
        meta("c.pfw.gz", 0.4, 390),
    ];
    let a = map_manifests(&metadata, 3.0).unwrap();
    let b = map_manifests(&metadata, 3.0).unwrap();
    assert_eq!(a, b);
}

#[test]
fn oversized_lines_still_make_progress() {
    // One line is bigger than the whole chunk target: it must still be
    // assigned (alone), not loop forever or vanish.
    let metadata = vec![meta("fat.pfw.gz", 10.0, 2)];
    let manifests = map_manifests(&metadata, 1.0).unwrap();
    assert_tiles(&coverage(&manifests, "fat.pfw.gz"), 1, 2);
    for m in &manifests {
        assert!(!m.specs.is_empty());
    }
}

#[test]
fn non_positive_chunk_size_is_invalid() {
    let metadata = vec![meta("a.pfw.gz", 1.0, 10)];
    assert!(matches!(
        map_manifests(&metadata, 0.0).unwrap_err(),
        TraceError::InvalidArgument(_)
    ));
    assert!(matches!(
        map_manifests(&metadata, -2.0).unwrap_err(),
        TraceError::InvalidArgument(_)
    ));
}

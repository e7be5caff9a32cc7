//! Fixture builders shared by the integration tests. Not a public API.

use std::io::Write;
use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;

/// A synthetic Chrome-trace-style body: `[`, one JSON event per line with a
/// trailing comma, `]`. Event `i` carries `id == i` so identities are unique
/// across the file.
pub fn trace_body(num_events: usize) -> String {
    let mut body = String::from("[\n");
    for i in 0..num_events {
        body.push_str(&format!(
            "{{\"id\":{},\"pid\":{},\"tid\":{},\"name\":\"op-{}\",\"cat\":\"posix\",\"ph\":\"X\",\"ts\":{},\"dur\":{},\"args\":{{\"fname\":\"/tmp/data-{:04}.bin\",\"ret\":0}}}},\n",
            i,
            1000 + i % 7,
            2000 + i % 13,
            i,
            1_000_000 + i * 17,
            3 + i % 29,
            i
        ));
    }
    body.push_str("]\n");
    body
}

/// Gzip `data` to `path`.
pub fn write_gz(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let file = std::fs::File::create(path)?;
    let mut encoder = GzEncoder::new(file, Compression::default());
    encoder.write_all(data)?;
    encoder.finish()?;
    Ok(())
}

/// Write a `num_events`-event trace archive at `path` and return its
/// uncompressed body.
pub fn write_trace_gz(path: &Path, num_events: usize) -> std::io::Result<String> {
    let body = trace_body(num_events);
    write_gz(path, body.as_bytes())?;
    Ok(body)
}

/// Split `body` into its lines, each including the trailing newline.
pub fn body_lines(body: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut rest = body;
    while !rest.is_empty() {
        match rest.find('\n') {
            Some(i) => {
                lines.push(&rest[..=i]);
                rest = &rest[i + 1..];
            }
            None => {
                lines.push(rest);
                break;
            }
        }
    }
    lines
}

use std::io::Write;

use anyhow::Result;
use clap::Parser;
use pfw_rs::index::DEFAULT_CHECKPOINT_SIZE;
use pfw_rs::reader::TraceReader;

#[derive(Parser, Debug)]
#[command(name = "pfw-cat", about = "Print a line range from an indexed archive")]
struct Args {
    /// Path to a .pfw.gz archive
    archive: std::path::PathBuf,
    /// Sidecar path (defaults to <archive>.idx; built when missing)
    #[arg(long)]
    index: Option<std::path::PathBuf>,
    /// First line to print (1-based, inclusive)
    #[arg(long, default_value_t = 1)]
    from: u64,
    /// Last line to print (inclusive; defaults to the last line)
    #[arg(long)]
    to: Option<u64>,
}

fn main() -> Result<()> {
    let _ = env_logger::try_init();
    let args = Args::parse();
    let index_path = args
        .index
        .unwrap_or_else(|| std::path::PathBuf::from(format!("{}.idx", args.archive.display())));

    let reader =
        TraceReader::open_or_build(&args.archive, &index_path, DEFAULT_CHECKPOINT_SIZE, false)?;
    let to = args.to.unwrap_or_else(|| reader.num_lines());

    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    let mut lines = reader.line_iter(args.from, to)?;
    while let Some(line) = lines.next_line()? {
        out.write_all(line)?;
    }
    out.flush()?;
    Ok(())
}

use anyhow::Result;
use clap::Parser;
use pfw_rs::index::{Indexer, DEFAULT_CHECKPOINT_SIZE};

#[derive(Parser, Debug)]
#[command(name = "pfw-index", about = "Build a random-access index for one archive")]
struct Args {
    /// Path to a .pfw.gz archive
    archive: std::path::PathBuf,
    /// Sidecar path (defaults to <archive>.idx)
    #[arg(long)]
    index: Option<std::path::PathBuf>,
    /// Checkpoint spacing in uncompressed bytes
    #[arg(long, default_value_t = DEFAULT_CHECKPOINT_SIZE)]
    checkpoint_size: u64,
    /// Rebuild even when the existing index is current
    #[arg(short, long)]
    force: bool,
}

fn main() -> Result<()> {
    let _ = env_logger::try_init();
    let args = Args::parse();
    let index_path = args
        .index
        .unwrap_or_else(|| std::path::PathBuf::from(format!("{}.idx", args.archive.display())));

    let index = Indexer::new(&args.archive, &index_path)
        .checkpoint_size(args.checkpoint_size)
        .force_rebuild(args.force)
        .ensure()?;

    println!(
        "indexed {}: {} lines, {} bytes uncompressed, {} checkpoints every {} bytes -> {}",
        args.archive.display(),
        index.num_lines(),
        index.max_bytes(),
        index.n_checkpoints(),
        index.checkpoint_size(),
        index_path.display()
    );
    Ok(())
}

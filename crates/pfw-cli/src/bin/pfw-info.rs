use anyhow::Result;
use clap::Parser;
use pfw_rs::index::TraceIndex;

#[derive(Parser, Debug)]
#[command(name = "pfw-info", about = "Print facts about an indexed archive")]
struct Args {
    /// Path to a .pfw.gz archive
    archive: std::path::PathBuf,
    /// Sidecar path (defaults to <archive>.idx)
    #[arg(long)]
    index: Option<std::path::PathBuf>,
    /// Also list every checkpoint
    #[arg(long)]
    checkpoints: bool,
}

fn main() -> Result<()> {
    let _ = env_logger::try_init();
    let args = Args::parse();
    let index_path = args
        .index
        .unwrap_or_else(|| std::path::PathBuf::from(format!("{}.idx", args.archive.display())));

    let index = TraceIndex::open(&args.archive, &index_path)?;
    println!("archive:         {}", args.archive.display());
    println!("index:           {}", index_path.display());
    println!("lines:           {}", index.num_lines());
    println!("bytes:           {}", index.max_bytes());
    println!("checkpoint size: {}", index.checkpoint_size());
    println!("checkpoints:     {}", index.n_checkpoints());

    if args.checkpoints {
        println!("{:>4}  {:>14}  {:>14}  {:>4}  {:>12}", "idx", "uc_offset", "c_offset", "bits", "line");
        for i in 0..index.n_checkpoints() {
            let c = index.checkpoint(i)?;
            println!(
                "{:>4}  {:>14}  {:>14}  {:>4}  {:>12}",
                i, c.uncompressed_offset, c.compressed_offset, c.bits, c.line_number
            );
        }
    }
    Ok(())
}

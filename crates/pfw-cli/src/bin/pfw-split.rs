use anyhow::Result;
use clap::Parser;
use pfw_rs::split::{run_split, SplitConfig};

#[derive(Parser, Debug)]
#[command(
    name = "pfw-split",
    about = "Split DFTracer traces into equal-sized chunks"
)]
struct Args {
    /// Application name for output files
    #[arg(short = 'n', long, default_value = "app")]
    app_name: String,
    /// Input directory containing .pfw or .pfw.gz files
    #[arg(short, long, default_value = ".")]
    directory: std::path::PathBuf,
    /// Output directory for split files
    #[arg(short, long, default_value = "./split")]
    output: std::path::PathBuf,
    /// Chunk size in MB
    #[arg(short = 's', long, default_value_t = 4)]
    chunk_size: u64,
    /// Rebuild indexes and overwrite existing outputs
    #[arg(short, long)]
    force: bool,
    /// Gzip output chunks (pass `--compress false` to disable)
    #[arg(
        short,
        long,
        default_value_t = true,
        action = clap::ArgAction::Set,
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    compress: bool,
    /// Checkpoint spacing for indexing, in uncompressed bytes
    #[arg(long, default_value_t = pfw_rs::index::DEFAULT_CHECKPOINT_SIZE)]
    checkpoint_size: u64,
    /// Worker threads (default: number of CPU cores)
    #[arg(long, default_value_t = 0)]
    threads: usize,
    /// Directory for index sidecars (default: system temp directory)
    #[arg(long)]
    index_dir: Option<std::path::PathBuf>,
    /// Verify output chunks match the input by comparing event identities
    #[arg(long)]
    verify: bool,
    /// Dump the mapped chunk manifests as JSON to stderr
    #[arg(long)]
    dump_manifests: bool,
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = SplitConfig {
        app_name: args.app_name,
        directory: args.directory,
        output_dir: args.output,
        chunk_size_mb: args.chunk_size as f64,
        force: args.force,
        compress: args.compress,
        checkpoint_size: args.checkpoint_size,
        threads: args.threads,
        index_dir: Some(args.index_dir.unwrap_or_else(std::env::temp_dir)),
        verify: args.verify,
    };

    let report = run_split(&config)?;

    if args.dump_manifests {
        eprintln!("{}", serde_json::to_string_pretty(&report.manifests)?);
    }

    for meta in &report.metadata {
        if !meta.success {
            eprintln!(
                "skipped {}: {}",
                meta.file_path.display(),
                meta.error.as_deref().unwrap_or("unknown error")
            );
        }
    }
    for chunk in &report.results {
        if !chunk.success {
            eprintln!(
                "chunk {} failed: {}",
                chunk.chunk_index,
                chunk.error.as_deref().unwrap_or("unknown error")
            );
        }
    }

    let ok_files = report.metadata.iter().filter(|m| m.success).count();
    let ok_chunks = report.results.iter().filter(|r| r.success).count();
    let input_mb: f64 = report
        .metadata
        .iter()
        .filter(|m| m.success)
        .map(|m| m.size_mb)
        .sum();
    println!(
        "split {}/{} files ({:.2} MB) into {}/{} chunks, {} events, in {:.2}s",
        ok_files,
        report.metadata.len(),
        input_mb,
        ok_chunks,
        report.results.len(),
        report.total_events(),
        report.elapsed.as_secs_f64()
    );

    if let Some(v) = report.verification {
        if v.passed {
            println!("verification: PASSED ({:016x})", v.input_hash);
        } else {
            println!(
                "verification: FAILED (input {:016x}, output {:016x})",
                v.input_hash, v.output_hash
            );
        }
    }

    std::process::exit(if report.succeeded() { 0 } else { 1 });
}

fn init_logging(verbose: bool) {
    let mut builder = env_logger::Builder::from_default_env();
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    let _ = builder.try_init();
}

use anyhow::{bail, Context, Result};
use clap::Parser;
use env_logger::Env;
use log::info;
use ndmosaic::{IndexKind, RunConfig, TileOrchestrator};
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ndmosaic")]
#[command(about = "Gap-filled monthly index mosaics and yearly statistics")]
#[command(version)]
struct Args {
    /// Index to process: ndvi, ndmi, ndbi or ndsi
    #[arg(long, value_name = "INDEX")]
    index: Option<IndexKind>,

    /// Archive root holding <year>/<INDEX>/ folders
    #[arg(short, long, value_name = "DIR")]
    input: Option<PathBuf>,

    /// Output root; products go to <DIR>/<index>/
    #[arg(short, long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// JSON run configuration; flags override its values
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// National boundary vector file
    #[arg(long, value_name = "FILE")]
    boundary: Option<PathBuf>,

    /// Number of tiles processed concurrently
    #[arg(short, long, value_name = "N")]
    workers: Option<usize>,

    /// Do not build overviews on the merged rasters
    #[arg(long)]
    skip_overviews: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level))
        .format(|buf, record| {
            writeln!(
                buf,
                "{} {:<5} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .init();

    let mut config = match &args.config {
        Some(path) => RunConfig::from_json_file(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => RunConfig::default(),
    };
    if let Some(index) = args.index {
        config.index = index;
    }
    if let Some(input) = args.input {
        config.input_root = input;
    }
    if let Some(output) = args.output {
        config.output_root = output;
    }
    if let Some(boundary) = args.boundary {
        config.boundary_path = boundary;
    }
    if let Some(workers) = args.workers {
        config.tile_workers = workers;
    }
    if args.skip_overviews {
        config.build_overviews = false;
    }

    info!("=== ndmosaic: {} ===", config.index);
    info!("Archive: {}", config.input_root.display());
    info!("Output: {}", config.index_root().display());

    let orchestrator = TileOrchestrator::new(config).context("Invalid run configuration")?;
    let summary = orchestrator.run().context("Mosaic run failed")?;

    if !summary.failed.is_empty() {
        bail!("{} tiles failed: {}", summary.failed.len(), summary.failed.join(", "));
    }
    info!("=== Done! ===");
    Ok(())
}

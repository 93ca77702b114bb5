//! CLI for BF16 fake quantization of GGUF FFN-norm weights.
//!
//! ```bash
//! fake_quantize_gguf input.gguf output.gguf --layers 0
//! fake_quantize_gguf input.gguf output.gguf --layers 0,5,11 --stats-output stats.json
//! GGUF_FAKE_QUANT_LAYERS=all fake_quantize_gguf input.gguf output.gguf
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use gguf_fake_quant::{fake_quantize_gguf, LayerSelection, TranscodeConfig};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "fake_quantize_gguf")]
#[command(version)]
#[command(about = "BF16 fake quantization of GGUF FFN norm weights", long_about = None)]
struct Args {
    /// Input GGUF file
    input_file: PathBuf,

    /// Output GGUF file
    output_file: PathBuf,

    /// Layers to process: 'all', '0' or '0,1,2'
    #[arg(long, env = "GGUF_FAKE_QUANT_LAYERS", default_value = "0")]
    layers: String,

    /// Where to write the per-tensor statistics (JSON)
    #[arg(long)]
    stats_output: Option<PathBuf>,

    /// Verbose output (debug logging and full error context)
    #[arg(short, long)]
    verbose: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    log_level: Option<Level>,
}

fn init_logging(args: &Args) {
    let level = match args.log_level {
        Some(level) => level,
        None if args.verbose => Level::DEBUG,
        None => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("failed to set tracing subscriber");
}

fn run(args: &Args) -> Result<()> {
    // Selection errors must surface before any file is touched.
    let target_layers: LayerSelection = args.layers.parse()?;

    let config = TranscodeConfig {
        input_path: args.input_file.clone(),
        output_path: args.output_file.clone(),
        target_layers,
        stats_output: args.stats_output.clone(),
    };

    println!("Input  : {}", config.input_path.display());
    println!("Output : {}", config.output_path.display());
    println!("Layers : {}", config.target_layers);

    let summary = fake_quantize_gguf(config)
        .with_context(|| format!("fake quantization of {} failed", args.input_file.display()))?;

    println!(
        "Done in {:.2}s. Architecture: {}, tensors: {}, modified {}/{} FFN norm tensors",
        summary.total_time_seconds,
        summary.architecture,
        summary.tensor_count,
        summary.modified_tensors,
        summary.candidate_tensors
    );
    println!(
        "Metadata: {} copied, {} internal skipped, {} failed",
        summary.metadata_copied,
        summary.metadata_skipped,
        summary.metadata_failures.len()
    );
    for (key, reason) in &summary.metadata_failures {
        println!("  [WARN] {key}: {reason}");
    }

    if !summary.stats.is_empty() {
        println!("\nTruncation statistics:");
        for s in &summary.stats {
            println!(
                "  {}: max abs={:.2e}, mean abs={:.2e}, max rel={:.2}%, mean rel={:.2}%",
                s.name,
                s.max_abs_diff,
                s.mean_abs_diff,
                s.max_rel_diff * 100.0,
                s.mean_rel_diff * 100.0
            );
            if s.non_finite > 0 {
                println!("    ({} NaN/inf elements excluded)", s.non_finite);
            }
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(&args);

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if args.verbose {
                eprintln!("Error: {e:?}");
            } else {
                eprintln!("Error: {e:#}");
            }
            ExitCode::FAILURE
        }
    }
}

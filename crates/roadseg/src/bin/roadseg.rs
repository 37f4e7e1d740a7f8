use std::path::PathBuf;

use anyhow::Result;
use burn::config::Config;
use clap::{Parser, Subcommand};
use roadseg::{
    backend::{create_device, SelectedBackend, BACKEND_NAME},
    commands::{run_log_submission, run_sample, run_submit, run_tile},
    ConfigOverrides, RunConfig,
};
use roadseg_submission::SubmissionOrder;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "roadseg")]
#[command(about = "Patch-based road segmentation: data generation, tiling and submissions")]
struct Cli {
    /// Run configuration (JSON); defaults are used when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Options applied on top of the configuration file
    #[command(flatten)]
    overrides: ConfigOverrides,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Convert a directory of discretized masks into a submission CSV
    Submit {
        /// Directory with mask images
        #[arg(short, long)]
        masks: PathBuf,

        /// CSV file to write
        #[arg(short, long, default_value = "submission.csv")]
        output: PathBuf,

        /// Keep the directory order instead of sorting rows by id
        #[arg(long)]
        input_order: bool,
    },

    /// Archive model, predictions, logs and CSVs of a run
    LogSubmission {
        /// Name of the archive directory; defaults to the submission name
        #[arg(short, long)]
        identifier: Option<String>,
    },

    /// Draw training patches from the configured dataset
    Sample {
        /// Number of batches to draw
        #[arg(short, long, default_value_t = 1)]
        batches: usize,

        /// Directory to write context/target PNGs into
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Tile and reassemble test images through the centre-crop predictor
    Tile {
        /// Directory for reassembled images
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write the effective configuration to a file
    Config {
        #[arg(short, long, default_value = "roadseg.json")]
        output: PathBuf,
    },

    /// Show backend information
    Info,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = cli
        .overrides
        .apply(RunConfig::load_or_default(cli.config.as_deref())?);
    let device = create_device();

    match cli.command {
        Commands::Submit {
            masks,
            output,
            input_order,
        } => {
            let order = if input_order {
                SubmissionOrder::Input
            } else {
                SubmissionOrder::Sorted
            };
            let rows = run_submit(&masks, &output, config.sub_thresh, order)?;
            println!("Wrote {rows} rows to {}", output.display());
        }

        Commands::LogSubmission { identifier } => {
            let identifier = identifier.unwrap_or_else(|| config.sub_name.clone());
            match run_log_submission(&config, &identifier)? {
                Some(path) => println!("Logged submission to {}", path.display()),
                None => println!("Submission logging is disabled (--sub-log false)"),
            }
        }

        Commands::Sample { batches, output } => {
            tracing::info!(backend = BACKEND_NAME, "sampling training patches");
            let summary =
                run_sample::<SelectedBackend>(&config, batches, output.as_deref(), &device)?;
            println!(
                "Drew {} patches in {} batches ({} road, {} skipped, {} candidates)",
                summary.patches, summary.batches, summary.road, summary.skipped, summary.attempts
            );
        }

        Commands::Tile { output } => {
            tracing::info!(backend = BACKEND_NAME, "tiling test images");
            let written = run_tile::<SelectedBackend>(&config, &output, &device)?;
            println!("Wrote {written} images to {}", output.display());
        }

        Commands::Config { output } => {
            config.save(&output)?;
            println!("Wrote configuration to {}", output.display());
        }

        Commands::Info => {
            println!("roadseg information:");
            println!("  Backend: {BACKEND_NAME}");
            println!("  Device: {device:?}");
            println!("  Patch size: {}", config.patch_size);
            println!("  Target size: {}", config.target_size);
        }
    }

    Ok(())
}

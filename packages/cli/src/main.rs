//! `genq` command-line tools.
//!
//! ## Usage
//!
//! ```bash
//! # Show the header of a tensor file
//! genq inspect canvas.tensor
//!
//! # Image to tensor and back
//! genq encode photo.png photo.tensor --force-rgb
//! genq decode preview.tensor preview.png --family flux
//!
//! # List the persisted queue
//! genq jobs --state-dir ./data/queue
//! genq jobs --job 01HZX3K8Q4J5R6S7T8V9W0XYZA --json
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use gen_core::JobStatus;
use tensor_codec::ModelFamily;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser, Debug)]
#[command(name = "genq")]
#[command(version)]
#[command(about = "Image generation queue tools", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the header of a tensor file
    Inspect {
        /// Tensor file
        path: PathBuf,
    },

    /// Encode an image (PNG, JPEG, WebP) as a tensor
    Encode {
        input: PathBuf,
        output: PathBuf,
        /// Drop the alpha channel even when the image has transparency
        #[arg(long)]
        force_rgb: bool,
    },

    /// Decode a tensor to PNG
    Decode {
        input: PathBuf,
        output: PathBuf,
        /// Model family for latent previews (sd15, sdxl, sd3, flux)
        #[arg(long)]
        family: Option<ModelFamily>,
    },

    /// List persisted jobs
    Jobs {
        /// Directory holding jobs.json (defaults to $GENQ_STATE_DIR, then ./data/queue)
        #[arg(long)]
        state_dir: Option<PathBuf>,
        /// Only show jobs with this status
        #[arg(long)]
        status: Option<JobStatus>,
        /// Only show the job with this id
        #[arg(long = "job")]
        job_id: Option<String>,
        /// Print jobs as JSON, without image data
        #[arg(long)]
        json: bool,
    },
}

fn init_logging() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    init_logging();

    let cli = Cli::parse();
    let result = match cli.command {
        Command::Inspect { path } => commands::inspect(&path),
        Command::Encode {
            input,
            output,
            force_rgb,
        } => commands::encode(&input, &output, force_rgb),
        Command::Decode {
            input,
            output,
            family,
        } => commands::decode(&input, &output, family),
        Command::Jobs {
            state_dir,
            status,
            job_id,
            json,
        } => commands::jobs(state_dir, status, job_id.as_deref(), json).await,
    };

    if let Err(err) = result {
        eprintln!("genq error: {:#}", err);
        std::process::exit(1);
    }
}

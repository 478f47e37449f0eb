//! kiln — batch-job submission to ephemeral, auto-provisioned clusters.
//!
//! Single binary wrapping the submission dispatcher:
//! - configuration layering (embedded defaults, files, flags)
//! - invocation-mode validation
//! - cluster acquire / job submit / guaranteed release
//!
//! # Usage
//!
//! ```text
//! kiln submit --config etl.json --client-id etl -- arg1 arg2
//! ```

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "kiln",
    about = "Kiln — submit batch jobs to ephemeral compute clusters",
    version,
    propagate_version = true,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a job, provisioning and collecting a cluster as needed.
    Submit(commands::submit::SubmitArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,kiln=debug".parse().unwrap()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Submit(args) => commands::submit::run(args).await,
    }
}

use anyhow::Result;
use clap::Parser;

mod analyze;
mod args;
mod catalog;
mod dispatch;
mod image_worker;
mod indices;
mod meta_worker;
mod metrics;
mod renderer;
mod store;

use args::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Dispatch(args) => dispatch::run_dispatch(args).await,
        Commands::MetaWorker(args) => meta_worker::run_meta_worker(args).await,
        Commands::ImageWorker(args) => image_worker::run_image_worker(args).await,
        Commands::Analyze(args) => analyze::run_analyze(args),
    }
}

mod cli;
mod detector;
mod engine;
mod model;
mod orchestrator;
mod planner;
mod server;

use anyhow::Result;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    cli::run(args).await
}

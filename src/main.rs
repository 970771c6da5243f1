mod cli;

use anyhow::Result;
use clap::Parser;
use cli::Cli;
use log::info;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    cilog::output::print_banner();

    let cli = Cli::parse();
    info!("Starting cilog - CI Log Analyzer");
    cli.execute().await?;

    Ok(())
}

//! ConfScout CLI: collect, deduplicate and enrich conference announcements.
//!
//! Scrapes a listing source through escalating fetch tiers, enriches new
//! announcements with an extraction service, and appends them to a CSV dataset.

mod commands;

use clap::Parser;
use color_eyre::eyre::Result;

use commands::Cli;

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    commands::init_tracing(&cli);
    commands::run(cli).await
}

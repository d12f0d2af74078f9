//! pgarchive CLI: build offline Project Gutenberg archives.
//!
//! Prepares the RDF catalog, loads it into a local metadata store, downloads
//! the selected books and packages them into one or more archives.

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

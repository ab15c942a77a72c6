//! Main entry point for the docfetch CLI application.
//!
//! Fetches the documentation bundle and unpacks it next to the
//! executable. An expired link or an invalid archive is reported and exits
//! normally; any other failure ends the process with an error.

use anyhow::Result;
use clap::Parser;
use tracing::debug;

use docfetch::{Cli, HttpBlobSource, Settings, workflow};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level())
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let settings = Settings::from_program_dir()?;
    debug!(base_dir = %settings.base_dir.display(), "starting");

    let source = HttpBlobSource::new()?;
    let outcome = workflow::run(&settings, &source, &mut std::io::stdout()).await?;
    debug!(?outcome, "done");

    Ok(())
}

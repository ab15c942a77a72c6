use clap::Parser;
use tracing::Level;

#[derive(Parser, Debug)]
#[command(name = "docfetch")]
#[command(version)]
#[command(about = "Download the project documentation bundle and unpack it", long_about = None)]
#[command(after_help = "The bundle is saved as downloaded_project.zip next to the executable and \
extracted into documentation/ beside it, which is replaced on every run.\n\n\
Examples:\n  \
  docfetch            fetch and unpack the bundle\n  \
  docfetch -vv        same, with debug diagnostics on stderr")]
pub struct Cli {
    /// Diagnostic output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn log_level(&self) -> Level {
        match self.verbose {
            0 => Level::WARN,
            1 => Level::INFO,
            2 => Level::DEBUG,
            _ => Level::TRACE,
        }
    }
}

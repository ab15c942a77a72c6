//! # docfetch
//!
//! Downloads a project documentation bundle and unpacks it into a local
//! `documentation/` directory.
//!
//! The bundle URL is fixed. When the server answers with JSON instead of
//! an archive, the link is considered expired and the payload is shown to
//! the user. Otherwise the body is saved as `downloaded_project.zip` next
//! to the executable, the documentation directory is recreated from it,
//! and a tree of its contents is printed along with a note about
//! `implementation_plan.md`.
//!
//! ## Features
//!
//! - Built-in ZIP reader with ZIP64, STORED, DEFLATE, BZIP2 and LZMA support
//! - CRC-32 verification of every extracted file
//! - Entry paths are confined to the destination directory
//!
//! ## Example
//!
//! ```no_run
//! use docfetch::{HttpBlobSource, Settings, workflow};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::from_program_dir()?;
//!     let source = HttpBlobSource::new()?;
//!     let outcome = workflow::run(&settings, &source, &mut std::io::stdout()).await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod io;
pub mod tree;
pub mod workflow;
pub mod zip;

pub use cli::Cli;
pub use config::Settings;
pub use io::{BlobSource, HttpBlobSource, LocalFileReader, ReadAt};
pub use tree::{EntryKind, TreeLine};
pub use workflow::Outcome;
pub use zip::{InvalidArchive, ZipExtractor, ZipFileEntry};

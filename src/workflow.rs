//! Download the bundle, decide what came back, and unpack it.
//!
//! A JSON body means the link has expired; anything else is taken to be
//! the zip bundle. Neither the status code nor `Content-Type` is consulted.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use serde_json::ser::{Formatter, PrettyFormatter, Serializer};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info};

use crate::config::{IMPLEMENTATION_PLAN_FILE_NAME, Settings};
use crate::io::{BlobSource, LocalFileReader};
use crate::tree::{self, TreeLine};
use crate::zip::{InvalidArchive, ZipExtractor};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Which way a run went
#[derive(Debug)]
pub enum Outcome {
    /// The server answered with JSON instead of the bundle
    LinkExpired { payload: Value },
    /// The bundle was saved but could not be read as a zip archive
    InvalidArchive { archive: PathBuf, reason: String },
    Extracted {
        archive: PathBuf,
        documentation_dir: PathBuf,
        /// Paths written during extraction, in archive order
        extracted: Vec<PathBuf>,
        tree: Vec<TreeLine>,
        has_implementation_plan: bool,
    },
}

/// Parse `body` as JSON, ignoring a leading byte order mark.
///
/// Any JSON value counts, not just objects.
pub fn sniff_json(body: &[u8]) -> Option<Value> {
    let body = body.strip_prefix(UTF8_BOM).unwrap_or(body);
    serde_json::from_slice(body).ok()
}

/// Pretty-print `value` with 2-space indentation and ASCII-only strings.
///
/// Numbers keep the digits they were parsed with.
pub fn render_json(value: &Value) -> Result<String> {
    let mut buf = Vec::new();
    let formatter = AsciiFormatter {
        inner: PrettyFormatter::with_indent(b"  "),
    };
    let mut ser = Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(String::from_utf8(buf)?)
}

/// [`PrettyFormatter`] that writes non-ASCII characters as `\uXXXX` escapes
struct AsciiFormatter<'a> {
    inner: PrettyFormatter<'a>,
}

impl Formatter for AsciiFormatter<'_> {
    fn begin_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_array(writer)
    }

    fn end_array<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array(writer)
    }

    fn begin_array_value<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_array_value(writer, first)
    }

    fn end_array_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_array_value(writer)
    }

    fn begin_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object(writer)
    }

    fn end_object<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object(writer)
    }

    fn begin_object_key<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        first: bool,
    ) -> io::Result<()> {
        self.inner.begin_object_key(writer, first)
    }

    fn begin_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.begin_object_value(writer)
    }

    fn end_object_value<W: ?Sized + Write>(&mut self, writer: &mut W) -> io::Result<()> {
        self.inner.end_object_value(writer)
    }

    fn write_string_fragment<W: ?Sized + Write>(
        &mut self,
        writer: &mut W,
        fragment: &str,
    ) -> io::Result<()> {
        let mut start = 0;
        for (i, ch) in fragment.char_indices() {
            if (' '..='~').contains(&ch) {
                continue;
            }
            writer.write_all(&fragment.as_bytes()[start..i])?;
            let mut units = [0u16; 2];
            for unit in ch.encode_utf16(&mut units) {
                write!(writer, "\\u{unit:04x}")?;
            }
            start = i + ch.len_utf8();
        }
        writer.write_all(&fragment.as_bytes()[start..])
    }
}

/// Fetch the bundle and unpack it into the documentation directory.
///
/// Progress is written to `out`. Only an expired link and an invalid
/// archive are handled here; network and filesystem failures propagate.
pub async fn run<S, W>(settings: &Settings, source: &S, out: &mut W) -> Result<Outcome>
where
    S: BlobSource + ?Sized,
    W: Write,
{
    let url = settings.url();
    writeln!(out, "Requesting URL: {url}")?;
    let body = source.fetch(url).await?;
    info!(len = body.len(), "download finished");

    if let Some(payload) = sniff_json(&body) {
        writeln!(out, "URL returned JSON response:")?;
        writeln!(out, "{}", render_json(&payload)?)?;
        writeln!(out)?;
        writeln!(
            out,
            "The URL returned a JSON response, which may indicate it has expired."
        )?;
        writeln!(out, "Please follow the instructions in the JSON response.")?;
        return Ok(Outcome::LinkExpired { payload });
    }
    writeln!(out, "URL returned a blob (binary data).")?;

    let archive = settings.archive_path();
    fs::write(&archive, &body)
        .await
        .with_context(|| format!("failed to write {}", archive.display()))?;
    writeln!(out, "Downloaded project files to {}", archive.display())?;

    let documentation_dir = settings.documentation_dir();
    reset_dir(&documentation_dir).await?;

    let reader = LocalFileReader::new(&archive)?;
    let extractor = ZipExtractor::new(Arc::new(reader));
    let extracted = match extractor.extract_all(&documentation_dir).await {
        Ok(paths) => paths,
        Err(err) => {
            if let Some(invalid) = err.downcast_ref::<InvalidArchive>() {
                info!(archive = %archive.display(), reason = invalid.reason(), "invalid archive");
                writeln!(out, "Error: The downloaded file is not a valid zip file.")?;
                return Ok(Outcome::InvalidArchive {
                    archive,
                    reason: invalid.reason().to_string(),
                });
            }
            return Err(err);
        }
    };
    info!(entries = extracted.len(), "archive extracted");
    writeln!(out, "Extracted files to {}", documentation_dir.display())?;

    writeln!(out)?;
    writeln!(out, "Extracted files:")?;
    let tree = tree::walk(&documentation_dir)?;
    for line in &tree {
        writeln!(out, "{line}")?;
    }

    let has_implementation_plan = settings.implementation_plan_path().exists();
    debug!(has_implementation_plan, "checked for {IMPLEMENTATION_PLAN_FILE_NAME}");
    writeln!(out)?;
    if has_implementation_plan {
        writeln!(
            out,
            "Found {IMPLEMENTATION_PLAN_FILE_NAME}. Please follow the instructions in this file."
        )?;
    } else {
        writeln!(
            out,
            "No {IMPLEMENTATION_PLAN_FILE_NAME} found. Please proceed with implementation based on other documents."
        )?;
    }

    Ok(Outcome::Extracted {
        archive,
        documentation_dir,
        extracted,
        tree,
        has_implementation_plan,
    })
}

/// Remove `dir` with everything in it, then create it empty.
async fn reset_dir(dir: &std::path::Path) -> Result<()> {
    if fs::try_exists(dir).await? {
        debug!(dir = %dir.display(), "removing previous output");
        fs::remove_dir_all(dir)
            .await
            .with_context(|| format!("failed to remove {}", dir.display()))?;
    }
    fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(())
}

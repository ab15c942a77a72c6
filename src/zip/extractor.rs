use bzip2::read::BzDecoder;
use flate2::Crc;
use flate2::read::DeflateDecoder;
use lzma_rs::decompress::UnpackedSize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;

use crate::io::ReadAt;
use anyhow::{Context, Result, bail};
use tracing::debug;

use super::error::InvalidArchive;
use super::parser::ZipParser;
use super::structures::{CompressionMethod, ZipFileEntry};

/// lc/lp/pb byte plus the 32-bit dictionary size
const LZMA_PROPS_LEN: usize = 5;

/// ZIP file extractor
pub struct ZipExtractor<R: ReadAt> {
    parser: ZipParser<R>,
}

impl<R: ReadAt> ZipExtractor<R> {
    pub fn new(reader: Arc<R>) -> Self {
        Self {
            parser: ZipParser::new(reader),
        }
    }

    /// List all files in the archive
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        self.parser.list_files().await
    }

    /// Extract file data to memory, checking size and CRC-32
    pub async fn extract_to_memory(&self, entry: &ZipFileEntry) -> Result<Vec<u8>> {
        if entry.is_encrypted() {
            bail!("Encrypted entries are not supported: {}", entry.file_name);
        }

        let data_offset = self.parser.get_data_offset(entry).await?;
        let data_end = data_offset.checked_add(entry.compressed_size);
        if data_end.is_none_or(|end| end > self.parser.size()) {
            return Err(InvalidArchive::new(format!(
                "data for {} runs past the end of the archive",
                entry.file_name
            ))
            .into());
        }

        let mut compressed = vec![0u8; entry.compressed_size as usize];
        self.parser
            .reader()
            .read_exact_at(data_offset, &mut compressed)
            .await?;

        let data = match entry.compression_method {
            CompressionMethod::Stored => compressed,
            CompressionMethod::Deflate => {
                decode_limited(DeflateDecoder::new(compressed.as_slice()), entry, "deflate")?
            }
            CompressionMethod::Bzip2 => {
                decode_limited(BzDecoder::new(compressed.as_slice()), entry, "bzip2")?
            }
            CompressionMethod::Lzma => decode_lzma(&compressed, entry)?,
            CompressionMethod::Unknown(method) => {
                bail!(
                    "Unsupported compression method: {} (supported: STORED, DEFLATE, BZIP2, LZMA)",
                    method
                );
            }
        };

        if data.len() as u64 != entry.uncompressed_size {
            return Err(InvalidArchive::new(format!(
                "{} decoded to {} bytes, expected {}",
                entry.file_name,
                data.len(),
                entry.uncompressed_size
            ))
            .into());
        }

        let mut crc = Crc::new();
        crc.update(&data);
        if crc.sum() != entry.crc32 {
            return Err(InvalidArchive::new(format!("bad CRC-32 for {}", entry.file_name)).into());
        }

        Ok(data)
    }

    /// Extract file to disk
    pub async fn extract_to_file(&self, entry: &ZipFileEntry, output_path: &Path) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        // Create parent directories if needed
        if let Some(parent) = output_path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
        }

        let data = self.extract_to_memory(entry).await?;

        let mut file = fs::File::create(output_path)
            .await
            .with_context(|| format!("failed to create {}", output_path.display()))?;
        file.write_all(&data).await?;
        file.flush().await?;

        Ok(())
    }

    /// Extract every entry below `dest`, preserving the archive's relative paths.
    ///
    /// Returns the paths written, in archive order. Entries whose names
    /// contain nothing but `.`/`..`/root components are skipped.
    pub async fn extract_all(&self, dest: &Path) -> Result<Vec<PathBuf>> {
        let entries = self.list_files().await?;
        let mut written = Vec::with_capacity(entries.len());

        for entry in &entries {
            let Some(relative) = entry.enclosed_name() else {
                debug!(name = %entry.file_name, "skipping entry with no usable path");
                continue;
            };
            let output_path = dest.join(relative);

            if entry.is_directory {
                fs::create_dir_all(&output_path)
                    .await
                    .with_context(|| format!("failed to create {}", output_path.display()))?;
            } else {
                debug!(name = %entry.file_name, size = entry.uncompressed_size, "extracting");
                self.extract_to_file(entry, &output_path).await?;
            }

            written.push(output_path);
        }

        Ok(written)
    }
}

/// Run `decoder` to the end, reading at most one byte past the declared size.
fn decode_limited<D: Read>(
    decoder: D,
    entry: &ZipFileEntry,
    codec: &str,
) -> Result<Vec<u8>, InvalidArchive> {
    let mut buf = Vec::with_capacity(entry.uncompressed_size.min(1 << 24) as usize);
    decoder
        .take(entry.uncompressed_size.saturating_add(1))
        .read_to_end(&mut buf)
        .map_err(|e| {
            InvalidArchive::new(format!("corrupt {codec} stream in {}: {e}", entry.file_name))
        })?;
    Ok(buf)
}

/// Decode a zip LZMA entry.
///
/// The data starts with a 4-byte header (LZMA SDK version, properties
/// length), then the 5 properties bytes and the raw stream. Unlike a
/// `.lzma` file there is no size field; the size comes from the directory
/// unless the entry says the stream carries an end marker.
fn decode_lzma(compressed: &[u8], entry: &ZipFileEntry) -> Result<Vec<u8>, InvalidArchive> {
    if compressed.len() < 4 {
        return Err(InvalidArchive::new(format!("truncated LZMA header in {}", entry.file_name)));
    }
    let props_len = u16::from_le_bytes([compressed[2], compressed[3]]) as usize;
    if props_len != LZMA_PROPS_LEN || compressed.len() < 4 + props_len {
        return Err(InvalidArchive::new(format!("bad LZMA properties in {}", entry.file_name)));
    }

    let unpacked_size = if entry.has_lzma_end_marker() {
        None
    } else {
        Some(entry.uncompressed_size)
    };
    let options = lzma_rs::decompress::Options {
        unpacked_size: UnpackedSize::UseProvided(unpacked_size),
        ..Default::default()
    };

    let mut input = &compressed[4..];
    let mut buf = Vec::new();
    lzma_rs::lzma_decompress_with_options(&mut input, &mut buf, &options).map_err(|e| {
        InvalidArchive::new(format!("corrupt lzma stream in {}: {e}", entry.file_name))
    })?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileReader;
    use crate::zip::{CDFH_SIGNATURE, EndOfCentralDirectory, LFH_SIGNATURE};
    use ::zip::write::SimpleFileOptions;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::{Cursor, Write};

    /// Lay out a one-entry archive by hand, for methods the zip writer can't produce.
    fn single_entry_archive(
        name: &str,
        method: u16,
        flags: u16,
        data: &[u8],
        contents: &[u8],
    ) -> Vec<u8> {
        let mut crc = Crc::new();
        crc.update(contents);

        let mut out = Vec::new();
        out.extend_from_slice(LFH_SIGNATURE);
        out.write_u16::<LittleEndian>(63).unwrap(); // version needed
        out.write_u16::<LittleEndian>(flags).unwrap();
        out.write_u16::<LittleEndian>(method).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap(); // mod time + date
        out.write_u32::<LittleEndian>(crc.sum()).unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(contents.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(data);

        let cd_offset = out.len();
        out.extend_from_slice(CDFH_SIGNATURE);
        out.write_u16::<LittleEndian>(63).unwrap(); // version made by
        out.write_u16::<LittleEndian>(63).unwrap(); // version needed
        out.write_u16::<LittleEndian>(flags).unwrap();
        out.write_u16::<LittleEndian>(method).unwrap();
        out.write_u32::<LittleEndian>(0).unwrap();
        out.write_u32::<LittleEndian>(crc.sum()).unwrap();
        out.write_u32::<LittleEndian>(data.len() as u32).unwrap();
        out.write_u32::<LittleEndian>(contents.len() as u32).unwrap();
        out.write_u16::<LittleEndian>(name.len() as u16).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap(); // extra field
        out.write_u16::<LittleEndian>(0).unwrap(); // comment
        out.write_u16::<LittleEndian>(0).unwrap(); // disk number start
        out.write_u16::<LittleEndian>(0).unwrap(); // internal attrs
        out.write_u32::<LittleEndian>(0).unwrap(); // external attrs
        out.write_u32::<LittleEndian>(0).unwrap(); // local header offset
        out.extend_from_slice(name.as_bytes());
        let cd_size = out.len() - cd_offset;

        out.extend_from_slice(EndOfCentralDirectory::SIGNATURE);
        out.write_u32::<LittleEndian>(0).unwrap(); // disk numbers
        out.write_u16::<LittleEndian>(1).unwrap();
        out.write_u16::<LittleEndian>(1).unwrap();
        out.write_u32::<LittleEndian>(cd_size as u32).unwrap();
        out.write_u32::<LittleEndian>(cd_offset as u32).unwrap();
        out.write_u16::<LittleEndian>(0).unwrap();
        out
    }

    /// Convert a `.lzma` stream into the zip LZMA entry layout.
    fn zip_lzma_payload(contents: &[u8]) -> Vec<u8> {
        let mut alone = Vec::new();
        lzma_rs::lzma_compress(&mut &contents[..], &mut alone).unwrap();

        // .lzma header: 5 properties bytes, then an 8-byte size we drop
        let mut payload = vec![9, 20];
        payload.write_u16::<LittleEndian>(LZMA_PROPS_LEN as u16).unwrap();
        payload.extend_from_slice(&alone[..LZMA_PROPS_LEN]);
        payload.extend_from_slice(&alone[LZMA_PROPS_LEN + 8..]);
        payload
    }

    fn write_archive(dir: &Path, files: &[(&str, &str)], method: ::zip::CompressionMethod) -> PathBuf {
        let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options = SimpleFileOptions::default().compression_method(method);
        for (name, contents) in files {
            if name.ends_with('/') {
                writer.add_directory(*name, options).unwrap();
            } else {
                writer.start_file(*name, options).unwrap();
                writer.write_all(contents.as_bytes()).unwrap();
            }
        }
        let bytes = writer.finish().unwrap().into_inner();

        let path = dir.join("bundle.zip");
        std::fs::write(&path, bytes).unwrap();
        path
    }

    fn extractor_for(path: &Path) -> ZipExtractor<LocalFileReader> {
        ZipExtractor::new(Arc::new(LocalFileReader::new(path).unwrap()))
    }

    #[tokio::test]
    async fn extracts_deflated_and_stored_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let text = "line of documentation\n".repeat(200);

        for method in [::zip::CompressionMethod::Deflated, ::zip::CompressionMethod::Stored] {
            let archive = write_archive(
                tmp.path(),
                &[("docs/", ""), ("docs/guide.md", text.as_str())],
                method,
            );
            let dest = tmp.path().join(format!("out-{method:?}"));

            let written = extractor_for(&archive).extract_all(&dest).await.unwrap();
            assert_eq!(written, [dest.join("docs"), dest.join("docs").join("guide.md")]);
            assert_eq!(
                std::fs::read_to_string(dest.join("docs").join("guide.md")).unwrap(),
                text
            );
        }
    }

    #[tokio::test]
    async fn keeps_traversal_entries_inside_destination() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = write_archive(
            tmp.path(),
            &[("../escape.txt", "nope")],
            ::zip::CompressionMethod::Stored,
        );
        let dest = tmp.path().join("dest");

        extractor_for(&archive).extract_all(&dest).await.unwrap();
        assert!(dest.join("escape.txt").is_file());
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn corrupted_data_fails_crc_check() {
        let tmp = tempfile::tempdir().unwrap();
        let archive = write_archive(
            tmp.path(),
            &[("plan.md", "follow these steps")],
            ::zip::CompressionMethod::Stored,
        );

        // Flip one byte of the stored payload
        let mut bytes = std::fs::read(&archive).unwrap();
        let pos = bytes.windows(6).position(|w| w == b"follow").unwrap();
        bytes[pos] ^= 0xFF;
        std::fs::write(&archive, bytes).unwrap();

        let err = extractor_for(&archive)
            .extract_all(&tmp.path().join("dest"))
            .await
            .unwrap_err();
        let invalid = err.downcast_ref::<InvalidArchive>().unwrap();
        assert!(invalid.reason().contains("CRC"));
    }

    #[tokio::test]
    async fn extracts_lzma_entries() {
        let tmp = tempfile::tempdir().unwrap();
        let contents = "lzma compressed plan\n".repeat(50);
        let payload = zip_lzma_payload(contents.as_bytes());

        // lzma-rs always terminates the stream with an end marker
        let bytes = single_entry_archive("plan.md", 14, 0x0002, &payload, contents.as_bytes());
        let archive = tmp.path().join("lzma.zip");
        std::fs::write(&archive, bytes).unwrap();

        let dest = tmp.path().join("dest");
        extractor_for(&archive).extract_all(&dest).await.unwrap();
        assert_eq!(std::fs::read_to_string(dest.join("plan.md")).unwrap(), contents);
    }

    #[tokio::test]
    async fn garbage_lzma_header_is_an_invalid_archive() {
        let tmp = tempfile::tempdir().unwrap();
        let bytes = single_entry_archive("plan.md", 14, 0, b"\x09\x14\x07\x00", b"x");
        let archive = tmp.path().join("lzma.zip");
        std::fs::write(&archive, bytes).unwrap();

        let err = extractor_for(&archive)
            .extract_all(&tmp.path().join("dest"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidArchive>().is_some());
    }

    #[tokio::test]
    async fn unknown_method_is_not_an_invalid_archive() {
        let tmp = tempfile::tempdir().unwrap();
        // 93 is zstd
        let bytes = single_entry_archive("plan.md", 93, 0, b"data", b"data");
        let archive = tmp.path().join("zstd.zip");
        std::fs::write(&archive, bytes).unwrap();

        let err = extractor_for(&archive)
            .extract_all(&tmp.path().join("dest"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<InvalidArchive>().is_none());
        assert!(err.to_string().contains("Unsupported compression method: 93"));
    }
}

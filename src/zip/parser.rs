//! Low-level ZIP archive parser.
//!
//! This module handles the binary parsing of ZIP file structures,
//! reading from any source that implements the [`ReadAt`] trait.
//!
//! ## Parsing Strategy
//!
//! ZIP files are designed to be read from the end:
//! 1. Find the End of Central Directory (EOCD) at the file's end
//! 2. If ZIP64, read the ZIP64 EOCD for large file support
//! 3. Read the Central Directory to get metadata for all files
//! 4. For extraction, read each file's Local File Header and data
//!
//! Every structural problem is reported as [`InvalidArchive`] so callers
//! can tell a bad download apart from an I/O failure.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::{Cursor, Read};
use std::sync::Arc;

use crate::io::ReadAt;
use anyhow::Result;
use tracing::{debug, trace};

use super::error::InvalidArchive;
use super::structures::*;

/// Maximum ZIP comment size allowed by the format (65535 bytes).
///
/// This limits the search area when looking for EOCD with a comment.
const MAX_COMMENT_SIZE: u64 = 65535;

/// Low-level ZIP file parser.
///
/// Typically used through [`ZipExtractor`](super::ZipExtractor)
/// rather than directly.
pub struct ZipParser<R: ReadAt> {
    /// The underlying data source
    reader: Arc<R>,
    /// Total size of the archive in bytes
    size: u64,
}

impl<R: ReadAt> ZipParser<R> {
    pub fn new(reader: Arc<R>) -> Self {
        let size = reader.size();
        Self { reader, size }
    }

    /// Find and parse the End of Central Directory record.
    ///
    /// Handles both the simple case (no comment) and archives with
    /// comments by searching backwards for the signature.
    ///
    /// # Returns
    ///
    /// A tuple of (EOCD record, offset of EOCD in file).
    pub async fn find_eocd(&self) -> Result<(EndOfCentralDirectory, u64)> {
        if self.size < EndOfCentralDirectory::SIZE as u64 {
            return Err(InvalidArchive::new("file too small to be a ZIP archive").into());
        }

        // Common case first: no comment, EOCD is the last 22 bytes
        let offset = self.size - EndOfCentralDirectory::SIZE as u64;
        let mut buf = vec![0u8; EndOfCentralDirectory::SIZE];
        self.reader.read_exact_at(offset, &mut buf).await?;

        if &buf[0..4] == EndOfCentralDirectory::SIGNATURE && &buf[20..22] == b"\x00\x00" {
            let eocd = EndOfCentralDirectory::from_bytes(&buf)?;
            return Ok((eocd, offset));
        }

        // The EOCD sits earlier when the archive carries a comment
        let search_size = (MAX_COMMENT_SIZE + EndOfCentralDirectory::SIZE as u64).min(self.size);
        let search_start = self.size - search_size;

        let mut buf = vec![0u8; search_size as usize];
        self.reader.read_exact_at(search_start, &mut buf).await?;

        // Search backwards for EOCD signature (PK\x05\x06)
        for i in (0..=buf.len() - EndOfCentralDirectory::SIZE).rev() {
            if &buf[i..i + 4] != EndOfCentralDirectory::SIGNATURE {
                continue;
            }

            // The comment length must account for exactly the remaining bytes
            let eocd = EndOfCentralDirectory::from_bytes(&buf[i..i + EndOfCentralDirectory::SIZE])?;
            if eocd.comment_len as usize == buf.len() - i - EndOfCentralDirectory::SIZE {
                return Ok((eocd, search_start + i as u64));
            }
        }

        Err(InvalidArchive::new("end of central directory not found").into())
    }

    /// Read the ZIP64 End of Central Directory record.
    ///
    /// Called when the regular EOCD indicates ZIP64 extensions are needed
    /// (fields set to 0xFFFF or 0xFFFFFFFF).
    ///
    /// # Returns
    ///
    /// A tuple of (ZIP64 EOCD record, offset of the record in file). The
    /// locator's offset is tried first, then the position right in front of
    /// the locator, where the record ends up when data was prepended.
    pub async fn read_zip64_eocd(&self, eocd_offset: u64) -> Result<(Zip64EOCD, u64)> {
        // The ZIP64 EOCD Locator is located immediately before the regular EOCD
        let locator_offset = eocd_offset
            .checked_sub(Zip64EOCDLocator::SIZE as u64)
            .ok_or_else(|| InvalidArchive::new("missing ZIP64 end of central directory locator"))?;
        let mut locator_buf = vec![0u8; Zip64EOCDLocator::SIZE];
        self.reader
            .read_exact_at(locator_offset, &mut locator_buf)
            .await?;

        let locator = Zip64EOCDLocator::from_bytes(&locator_buf)?;

        let mut eocd64_buf = vec![0u8; Zip64EOCD::MIN_SIZE];
        if self
            .reader
            .read_exact_at(locator.eocd64_offset, &mut eocd64_buf)
            .await
            .is_ok()
            && let Ok(eocd64) = Zip64EOCD::from_bytes(&eocd64_buf)
        {
            return Ok((eocd64, locator.eocd64_offset));
        }

        let record_offset = locator_offset
            .checked_sub(Zip64EOCD::MIN_SIZE as u64)
            .ok_or_else(|| InvalidArchive::new("missing ZIP64 end of central directory record"))?;
        self.reader
            .read_exact_at(record_offset, &mut eocd64_buf)
            .await?;
        Ok((Zip64EOCD::from_bytes(&eocd64_buf)?, record_offset))
    }

    /// List all files in the ZIP archive.
    ///
    /// Reads the EOCD, then fetches and parses the whole Central Directory.
    ///
    /// Recorded offsets are relative to the start of the zip data. When
    /// something was prepended (a self-extractor or shell stub), the gap
    /// between where the directory should end and where its end record
    /// actually sits is added to every offset.
    pub async fn list_files(&self) -> Result<Vec<ZipFileEntry>> {
        let (eocd, eocd_offset) = self.find_eocd().await?;

        let (cd_offset, cd_size, total_entries, directory_end) = if eocd.is_zip64() {
            let (eocd64, eocd64_offset) = self.read_zip64_eocd(eocd_offset).await?;
            (
                eocd64.cd_offset,
                eocd64.cd_size,
                eocd64.total_entries,
                eocd64_offset,
            )
        } else {
            (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.total_entries as u64,
                eocd_offset,
            )
        };

        // The directory has to fit in front of its end record
        let prefix = cd_offset
            .checked_add(cd_size)
            .and_then(|cd_end| directory_end.checked_sub(cd_end))
            .ok_or_else(|| {
                InvalidArchive::new(format!(
                    "central directory ({cd_size} bytes at {cd_offset}) lies outside the archive"
                ))
            })?;
        if prefix > 0 {
            debug!(prefix, "archive has data prepended");
        }
        let cd_offset = cd_offset + prefix;

        let mut cd_data = vec![0u8; cd_size as usize];
        self.reader.read_exact_at(cd_offset, &mut cd_data).await?;

        // Never trust the entry count for the allocation
        let capacity = total_entries.min(cd_size / CDFH_MIN_SIZE as u64) as usize;
        let mut entries = Vec::with_capacity(capacity);
        let mut cursor = Cursor::new(cd_data.as_slice());

        for _ in 0..total_entries {
            let mut entry = parse_cdfh(&mut cursor)?;
            entry.lfh_offset = entry.lfh_offset.checked_add(prefix).ok_or_else(|| {
                InvalidArchive::new(format!("bad local header offset for {}", entry.file_name))
            })?;
            trace!(name = %entry.file_name, method = entry.compression_method.as_u16(), "central directory entry");
            entries.push(entry);
        }

        Ok(entries)
    }

    /// Get the actual data offset for a file entry.
    ///
    /// The Local File Header (LFH) has variable-length fields (filename,
    /// extra field) that may differ from the Central Directory entry,
    /// so the LFH has to be read to find where the data begins.
    pub async fn get_data_offset(&self, entry: &ZipFileEntry) -> Result<u64> {
        let mut lfh_buf = vec![0u8; LFH_SIZE];
        self.reader.read_exact_at(entry.lfh_offset, &mut lfh_buf).await?;

        // Verify LFH signature (PK\x03\x04)
        if &lfh_buf[0..4] != LFH_SIGNATURE {
            return Err(InvalidArchive::new(format!(
                "bad local file header for {}",
                entry.file_name
            ))
            .into());
        }

        // Filename and extra field lengths sit at fixed positions
        let mut cursor = Cursor::new(&lfh_buf[26..]);
        let file_name_length = cursor.read_u16::<LittleEndian>()? as u64;
        let extra_field_length = cursor.read_u16::<LittleEndian>()? as u64;

        Ok(entry.lfh_offset + LFH_SIZE as u64 + file_name_length + extra_field_length)
    }

    pub fn reader(&self) -> &Arc<R> {
        &self.reader
    }

    /// Total size of the archive in bytes
    pub fn size(&self) -> u64 {
        self.size
    }
}

/// Parse a Central Directory File Header from a cursor.
fn parse_cdfh(cursor: &mut Cursor<&[u8]>) -> Result<ZipFileEntry, InvalidArchive> {
    // Read and verify the signature (PK\x01\x02)
    let mut sig = [0u8; 4];
    cursor.read_exact(&mut sig)?;
    if sig != CDFH_SIGNATURE {
        return Err(InvalidArchive::new("bad central directory file header"));
    }

    let _version_made_by = cursor.read_u16::<LittleEndian>()?;
    let _version_needed = cursor.read_u16::<LittleEndian>()?;
    let flags = cursor.read_u16::<LittleEndian>()?;
    let compression_method = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_time = cursor.read_u16::<LittleEndian>()?;
    let _last_mod_date = cursor.read_u16::<LittleEndian>()?;
    let crc32 = cursor.read_u32::<LittleEndian>()?;
    let mut compressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let mut uncompressed_size = cursor.read_u32::<LittleEndian>()? as u64;
    let file_name_length = cursor.read_u16::<LittleEndian>()?;
    let extra_field_length = cursor.read_u16::<LittleEndian>()?;
    let file_comment_length = cursor.read_u16::<LittleEndian>()?;
    let _disk_number_start = cursor.read_u16::<LittleEndian>()?;
    let _internal_attrs = cursor.read_u16::<LittleEndian>()?;
    let _external_attrs = cursor.read_u32::<LittleEndian>()?;
    let mut lfh_offset = cursor.read_u32::<LittleEndian>()? as u64;

    let mut file_name_bytes = vec![0u8; file_name_length as usize];
    cursor.read_exact(&mut file_name_bytes)?;
    // Lossy conversion keeps non-UTF8 names usable
    let file_name = String::from_utf8_lossy(&file_name_bytes).to_string();

    let is_directory = file_name.ends_with('/');

    // ZIP64 extended information lives in extra field 0x0001
    let extra_field_end = cursor.position() + extra_field_length as u64;
    if extra_field_end > cursor.get_ref().len() as u64 {
        return Err(InvalidArchive::new(format!(
            "extra field of {file_name} runs past the central directory"
        )));
    }

    while cursor.position() + 4 <= extra_field_end {
        let header_id = cursor.read_u16::<LittleEndian>()?;
        let field_size = cursor.read_u16::<LittleEndian>()?;
        let field_end = (cursor.position() + field_size as u64).min(extra_field_end);

        if header_id == 0x0001 {
            // Values are present only for header fields saturated at 0xFFFFFFFF
            if uncompressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                uncompressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if compressed_size == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                compressed_size = cursor.read_u64::<LittleEndian>()?;
            }
            if lfh_offset == 0xFFFFFFFF && cursor.position() + 8 <= field_end {
                lfh_offset = cursor.read_u64::<LittleEndian>()?;
            }
        }

        cursor.set_position(field_end);
    }

    cursor.set_position(extra_field_end + file_comment_length as u64);

    Ok(ZipFileEntry {
        file_name,
        flags,
        compression_method: CompressionMethod::from_u16(compression_method),
        compressed_size,
        uncompressed_size,
        crc32,
        lfh_offset,
        is_directory,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::LocalFileReader;
    use std::io::Write;
    use ::zip::write::SimpleFileOptions;

    fn build_zip(comment: Option<&str>) -> Vec<u8> {
        let mut writer = ::zip::ZipWriter::new(Cursor::new(Vec::new()));
        let options =
            SimpleFileOptions::default().compression_method(::zip::CompressionMethod::Stored);
        writer.add_directory("guides/", options).unwrap();
        writer.start_file("guides/setup.md", options).unwrap();
        writer.write_all(b"# Setup\n").unwrap();
        writer.start_file("README.md", options).unwrap();
        writer.write_all(b"readme").unwrap();
        if let Some(comment) = comment {
            writer.set_comment(comment);
        }
        writer.finish().unwrap().into_inner()
    }

    fn parser_for(bytes: &[u8]) -> (tempfile::NamedTempFile, ZipParser<LocalFileReader>) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(bytes).unwrap();
        let reader = Arc::new(LocalFileReader::new(file.path()).unwrap());
        (file, ZipParser::new(reader))
    }

    fn is_invalid(err: &anyhow::Error) -> bool {
        err.downcast_ref::<InvalidArchive>().is_some()
    }

    #[tokio::test]
    async fn lists_entries_in_archive_order() {
        let (_file, parser) = parser_for(&build_zip(None));

        let entries = parser.list_files().await.unwrap();
        let names: Vec<_> = entries.iter().map(|e| e.file_name.as_str()).collect();
        assert_eq!(names, ["guides/", "guides/setup.md", "README.md"]);
        assert!(entries[0].is_directory);
        assert_eq!(entries[1].uncompressed_size, 8);
    }

    #[tokio::test]
    async fn finds_eocd_behind_a_comment() {
        let (_file, parser) = parser_for(&build_zip(Some("generated bundle")));

        let (eocd, offset) = parser.find_eocd().await.unwrap();
        assert_eq!(eocd.comment_len as usize, "generated bundle".len());
        assert_eq!(
            offset,
            parser.size() - EndOfCentralDirectory::SIZE as u64 - eocd.comment_len as u64
        );
        assert_eq!(parser.list_files().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn rejects_non_zip_data() {
        let (_file, parser) = parser_for(b"<html>this is not the archive you wanted</html>");
        assert!(is_invalid(&parser.list_files().await.unwrap_err()));

        let (_file, parser) = parser_for(b"");
        assert!(is_invalid(&parser.list_files().await.unwrap_err()));
    }

    #[tokio::test]
    async fn rejects_truncated_archive() {
        let bytes = build_zip(None);
        let (_file, parser) = parser_for(&bytes[..bytes.len() / 2]);
        assert!(is_invalid(&parser.list_files().await.unwrap_err()));
    }

    #[tokio::test]
    async fn rejects_central_directory_out_of_bounds() {
        let mut bytes = build_zip(None);
        // Point cd_offset at the end of the file
        let eocd = bytes.len() - EndOfCentralDirectory::SIZE;
        let bogus = (bytes.len() as u32).to_le_bytes();
        bytes[eocd + 16..eocd + 20].copy_from_slice(&bogus);

        let (_file, parser) = parser_for(&bytes);
        assert!(is_invalid(&parser.list_files().await.unwrap_err()));
    }

    #[tokio::test]
    async fn data_offset_skips_local_header() {
        let (_file, parser) = parser_for(&build_zip(None));
        let entries = parser.list_files().await.unwrap();

        let readme = &entries[2];
        let offset = parser.get_data_offset(readme).await.unwrap();
        let mut buf = vec![0u8; readme.uncompressed_size as usize];
        parser.reader().read_exact_at(offset, &mut buf).await.unwrap();
        assert_eq!(buf, b"readme");
    }

    #[tokio::test]
    async fn tolerates_prepended_stub() {
        let mut bytes = b"#!/bin/sh\nexit 0\n".to_vec();
        bytes.extend(build_zip(None));
        let (_file, parser) = parser_for(&bytes);

        let entries = parser.list_files().await.unwrap();
        assert_eq!(entries.len(), 3);

        let readme = &entries[2];
        let offset = parser.get_data_offset(readme).await.unwrap();
        let mut buf = vec![0u8; readme.uncompressed_size as usize];
        parser.reader().read_exact_at(offset, &mut buf).await.unwrap();
        assert_eq!(buf, b"readme");
    }
}

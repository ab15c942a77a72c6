mod http;
mod local;

pub use http::HttpBlobSource;
pub use local::LocalFileReader;

use anyhow::Result;
use async_trait::async_trait;

use crate::zip::InvalidArchive;

/// Trait for random access reading from a data source
#[async_trait]
pub trait ReadAt: Send + Sync {
    /// Read data at the specified offset into the buffer
    async fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Get the total size of the data source
    fn size(&self) -> u64;

    /// Fill the whole buffer starting at `offset`.
    ///
    /// Running out of data is reported as [`InvalidArchive`], since every
    /// caller is reading a structure the archive claims to contain.
    async fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self
                .read_at(offset + filled as u64, &mut buf[filled..])
                .await?;
            if n == 0 {
                return Err(InvalidArchive::new(format!(
                    "unexpected end of archive at offset {}",
                    offset + filled as u64
                ))
                .into());
            }
            filled += n;
        }
        Ok(())
    }
}

/// Source of a whole response body
#[async_trait]
pub trait BlobSource: Send + Sync {
    /// Fetch the complete body behind `url`
    async fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

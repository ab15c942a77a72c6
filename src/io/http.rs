use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use super::BlobSource;

/// Downloads a whole response body with a single GET
///
/// The client keeps reqwest's defaults: no timeout, no retries and the
/// standard redirect policy. The status code is logged but not acted on.
pub struct HttpBlobSource {
    client: Client,
}

impl HttpBlobSource {
    pub fn new() -> Result<Self> {
        let client = Client::builder().build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BlobSource for HttpBlobSource {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?;

        debug!(status = %resp.status(), content_type = ?resp.headers().get("content-type"), "response received");

        let bytes = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read response body from {url}"))?;

        debug!(len = bytes.len(), "response body read");
        Ok(bytes.to_vec())
    }
}

//! Fetching voice payloads to local disk.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;

use palaver_core::types::MediaAttachment;

/// Largest voice payload accepted (20 MB).
pub const MAX_VOICE_BYTES: u64 = 20 * 1024 * 1024;

/// Writes an attachment's bytes to `dest`, returning the number of bytes written.
#[async_trait]
pub trait Downloader: Send + Sync {
    async fn download(&self, attachment: &MediaAttachment, dest: &Path) -> Result<u64>;
}

/// Uses inline attachment data when present, otherwise GETs the attachment URL.
pub struct HttpDownloader {
    client: reqwest::Client,
    max_bytes: u64,
}

impl HttpDownloader {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            max_bytes: MAX_VOICE_BYTES,
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    async fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;

        if !resp.status().is_success() {
            anyhow::bail!("GET {url} returned {}", resp.status());
        }
        if let Some(len) = resp.content_length() {
            if len > self.max_bytes {
                anyhow::bail!("voice payload too large ({len} bytes, limit {})", self.max_bytes);
            }
        }

        Ok(resp.bytes().await?.to_vec())
    }
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, attachment: &MediaAttachment, dest: &Path) -> Result<u64> {
        let bytes = match (&attachment.data, &attachment.url) {
            (Some(data), _) => data.clone(),
            (None, Some(url)) => self.fetch(url).await?,
            (None, None) => anyhow::bail!("attachment has neither inline data nor a URL"),
        };

        if bytes.is_empty() {
            anyhow::bail!("voice payload is empty");
        }
        if bytes.len() as u64 > self.max_bytes {
            anyhow::bail!(
                "voice payload too large ({} bytes, limit {})",
                bytes.len(),
                self.max_bytes
            );
        }

        tokio::fs::write(dest, &bytes)
            .await
            .with_context(|| format!("writing {}", dest.display()))?;
        debug!(path = %dest.display(), bytes = bytes.len(), "Voice payload stored");
        Ok(bytes.len() as u64)
    }
}

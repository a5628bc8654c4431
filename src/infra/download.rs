//! HTTP download functionality
//!
//! Streams base-image downloads to disk with throttled progress reporting
//! and provides the checksum helpers used by the artifact packager. Download
//! failures are reported to the caller; the acquisition layer decides whether
//! to degrade to a placeholder.

use std::io::Read;
use std::path::Path;
use std::time::Duration;

use futures::StreamExt;
use sha2::{Digest, Sha256};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::defaults;
use crate::error::AcquireError;

/// Progress callback: (bytes downloaded, total bytes or 0 if unknown)
pub type ByteProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Throttles byte progress to the ≥5%-or-≥10 MiB reporting granularity
#[derive(Debug)]
pub struct ProgressThrottle {
    total: u64,
    last_bytes: u64,
    last_percent: u64,
}

impl ProgressThrottle {
    pub fn new(total: u64) -> Self {
        Self {
            total,
            last_bytes: 0,
            last_percent: 0,
        }
    }

    /// True when enough bytes or percent have accumulated since the last
    /// report. The first byte and the final byte always report.
    pub fn should_report(&mut self, downloaded: u64) -> bool {
        let percent = if self.total > 0 {
            downloaded * 100 / self.total
        } else {
            0
        };

        let byte_step = downloaded.saturating_sub(self.last_bytes) >= defaults::PROGRESS_BYTE_STEP;
        let percent_step =
            percent.saturating_sub(self.last_percent) >= defaults::PROGRESS_PERCENT_STEP;
        let done = self.total > 0 && downloaded >= self.total;
        let first = self.last_bytes == 0 && downloaded > 0;

        if byte_step || percent_step || done || first {
            self.last_bytes = downloaded;
            self.last_percent = percent;
            true
        } else {
            false
        }
    }
}

/// HTTP downloader for base images
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
}

impl Downloader {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(defaults::DOWNLOAD_TIMEOUT)
                .connect_timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    /// Stream `url` into `dest`, reporting throttled progress.
    ///
    /// Returns the number of bytes written. A partial file is removed on
    /// failure.
    pub async fn fetch(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ByteProgress<'_>>,
    ) -> Result<u64, AcquireError> {
        let result = self.fetch_inner(url, dest, progress).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn fetch_inner(
        &self,
        url: &str,
        dest: &Path,
        progress: Option<ByteProgress<'_>>,
    ) -> Result<u64, AcquireError> {
        let response = self.client.get(url).send().await.map_err(|e| {
            AcquireError::NetworkFailure {
                url: url.to_string(),
                error: e.to_string(),
            }
        })?;

        if !response.status().is_success() {
            return Err(AcquireError::NetworkFailure {
                url: url.to_string(),
                error: format!("HTTP {}", response.status()),
            });
        }

        let total = response.content_length().unwrap_or(0);
        let mut throttle = ProgressThrottle::new(total);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AcquireError::io(parent, &e))?;
        }

        let mut file = File::create(dest)
            .await
            .map_err(|e| AcquireError::io(dest, &e))?;

        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| AcquireError::NetworkFailure {
                url: url.to_string(),
                error: e.to_string(),
            })?;

            file.write_all(&chunk)
                .await
                .map_err(|e| AcquireError::io(dest, &e))?;

            downloaded += chunk.len() as u64;
            if let Some(cb) = progress {
                if throttle.should_report(downloaded) {
                    cb(downloaded, total);
                }
            }
        }

        file.flush().await.map_err(|e| AcquireError::io(dest, &e))?;

        Ok(downloaded)
    }
}

impl Default for Downloader {
    fn default() -> Self {
        Self::new()
    }
}

/// SHA256 of a file, streamed in chunks
pub fn file_sha256(path: &Path) -> Result<String, AcquireError> {
    let mut file = std::fs::File::open(path).map_err(|e| AcquireError::io(path, &e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; defaults::IO_CHUNK_SIZE];

    loop {
        let n = file
            .read(&mut buffer)
            .map_err(|e| AcquireError::io(path, &e))?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// SHA256 of in-memory data
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

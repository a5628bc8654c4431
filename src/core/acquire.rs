//! Base image acquisition and caching
//!
//! Cache-first acquisition of the base OS image: a cache hit is copied into
//! the build working directory before any network activity happens. On a
//! miss the image is resolved, downloaded, decompressed through the strategy
//! chain, integrity-checked, and written to the cache before the working
//! copy is made. Any failure along the real-download path degrades to a
//! small, clearly non-bootable placeholder so the rest of the pipeline stays
//! exercisable offline.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Settings;
use crate::core::model::BuildConfiguration;
use crate::core::resolver::ArchiveResolver;
use crate::error::AcquireError;
use crate::infra::decompress::decompress_xz;
use crate::infra::download::Downloader;
use crate::infra::runner::ToolRunner;

/// Step progress callback: (percent within this step, message)
pub type StepProgress<'a> = &'a (dyn Fn(u8, &str) + Send + Sync);

/// Where the acquired image came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Copied from the download cache
    Cache,
    /// Downloaded and decompressed in this build
    Download,
    /// Synthesized stand-in; not bootable
    Placeholder,
}

/// Result of one acquisition
#[derive(Debug)]
pub struct AcquiredImage {
    /// Image file inside the build working directory
    pub path: PathBuf,
    pub source: ImageSource,
}

/// Acquires base images for builds
pub struct ImageAcquirer<R: ToolRunner> {
    settings: Settings,
    resolver: ArchiveResolver,
    downloader: Downloader,
    runner: Arc<R>,
}

impl<R: ToolRunner> ImageAcquirer<R> {
    pub fn new(settings: Settings, runner: Arc<R>) -> Self {
        Self {
            settings,
            resolver: ArchiveResolver::new(),
            downloader: Downloader::new(),
            runner,
        }
    }

    /// Override the resolver (tests point it at a mock archive).
    pub fn with_resolver(mut self, resolver: ArchiveResolver) -> Self {
        self.resolver = resolver;
        self
    }

    /// Acquire the base image for `config` into the build's working
    /// directory.
    pub async fn acquire(
        &self,
        config: &BuildConfiguration,
        build_id: &str,
        progress: StepProgress<'_>,
    ) -> Result<AcquiredImage, AcquireError> {
        let work_dir = self.settings.work_dir(build_id);
        std::fs::create_dir_all(&work_dir).map_err(|e| AcquireError::io(&work_dir, &e))?;

        let cache_key = config.cache_key();
        let cached = self.settings.cache_dir.join(&cache_key);
        let dest = work_dir.join(&cache_key);

        // Cache check comes before any network activity.
        if cached.is_file() && file_len(&cached)? > 0 {
            progress(10, "base image found in cache");
            std::fs::copy(&cached, &dest).map_err(|e| AcquireError::io(&dest, &e))?;
            ensure_non_zero(&dest)?;
            progress(100, "base image ready (cached)");
            return Ok(AcquiredImage {
                path: dest,
                source: ImageSource::Cache,
            });
        }

        if self.settings.demo_mode {
            progress(50, "demo mode: synthesizing placeholder image");
            let path = self.write_placeholder(config, &dest, "demo mode is enabled")?;
            progress(100, "placeholder image ready");
            return Ok(AcquiredImage {
                path,
                source: ImageSource::Placeholder,
            });
        }

        match self.acquire_real(config, &cached, &dest, progress).await {
            Ok(()) => Ok(AcquiredImage {
                path: dest,
                source: ImageSource::Download,
            }),
            Err(e) => {
                tracing::warn!("image acquisition failed, degrading to placeholder: {e}");
                let path = self.write_placeholder(config, &dest, &e.to_string())?;
                progress(100, "placeholder image ready (acquisition failed)");
                Ok(AcquiredImage {
                    path,
                    source: ImageSource::Placeholder,
                })
            }
        }
    }

    /// The real download path: resolve, download, decompress, validate,
    /// cache, copy. Every intermediate file is checked for zero bytes, and
    /// no partial file survives a failure.
    async fn acquire_real(
        &self,
        config: &BuildConfiguration,
        cached: &Path,
        dest: &Path,
        progress: StepProgress<'_>,
    ) -> Result<(), AcquireError> {
        let result = self
            .acquire_real_inner(config, cached, dest, progress)
            .await;
        if result.is_err() {
            let _ = std::fs::remove_file(cached.with_extension("img.xz"));
            let _ = std::fs::remove_file(cached);
        }
        result
    }

    async fn acquire_real_inner(
        &self,
        config: &BuildConfiguration,
        cached: &Path,
        dest: &Path,
        progress: StepProgress<'_>,
    ) -> Result<(), AcquireError> {
        progress(2, "resolving image in archive");
        let url = self
            .resolver
            .resolve(
                &config.board.name,
                &config.distribution.release,
                config.distribution.variant,
                config.distribution.desktop.as_deref(),
            )
            .await?;
        tracing::info!("resolved base image: {url}");

        let cache_dir = self.settings.cache_dir.clone();
        std::fs::create_dir_all(&cache_dir).map_err(|e| AcquireError::io(&cache_dir, &e))?;
        let packed = cached.with_extension("img.xz");

        progress(5, "downloading base image");
        // The download occupies the 5-70% slice of acquisition progress.
        let report = |downloaded: u64, total: u64| {
            let pct = if total > 0 {
                5 + (downloaded * 65 / total) as u8
            } else {
                5
            };
            let mib = downloaded / (1024 * 1024);
            progress(pct.min(70), &format!("downloaded {mib} MiB"));
        };
        self.downloader.fetch(&url, &packed, Some(&report)).await?;
        ensure_non_zero(&packed)?;

        progress(75, "decompressing base image");
        decompress_xz(self.runner.as_ref(), &packed, cached).await?;
        ensure_non_zero(cached)?;
        let _ = std::fs::remove_file(&packed);

        progress(90, "caching base image");
        std::fs::copy(cached, dest).map_err(|e| AcquireError::io(dest, &e))?;
        ensure_non_zero(dest)?;

        progress(100, "base image ready");
        Ok(())
    }

    /// Synthesize the degraded stand-in artifact. The content, not a flag,
    /// is what marks it as non-bootable.
    fn write_placeholder(
        &self,
        config: &BuildConfiguration,
        dest: &Path,
        reason: &str,
    ) -> Result<PathBuf, AcquireError> {
        let content = format!(
            "ROCKFORGE PLACEHOLDER IMAGE - NOT BOOTABLE\n\
             ==========================================\n\
             \n\
             The base image for this build could not be acquired, so this\n\
             placeholder was produced to keep the pipeline exercisable.\n\
             Do not flash this file to a device.\n\
             \n\
             board:   {board}\n\
             release: {release}\n\
             variant: {variant}\n\
             reason:  {reason}\n",
            board = config.board.name,
            release = config.distribution.release,
            variant = config.distribution.variant.label(),
        );
        std::fs::write(dest, &content).map_err(|e| AcquireError::io(dest, &e))?;
        Ok(dest.to_path_buf())
    }
}

fn file_len(path: &Path) -> Result<u64, AcquireError> {
    Ok(std::fs::metadata(path)
        .map_err(|e| AcquireError::io(path, &e))?
        .len())
}

/// A zero-byte file at any stage is a hard error, never a silent continue.
fn ensure_non_zero(path: &Path) -> Result<(), AcquireError> {
    if file_len(path)? == 0 {
        return Err(AcquireError::IntegrityFailure {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

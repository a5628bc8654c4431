//! Flash engine
//!
//! Owns the flash-job state machine: queued → running → {completed, failed},
//! with running sub-phases detecting → [downloading_boot] → writing →
//! resetting. Inventory polling is suspended for the whole job and restored
//! unconditionally; temporary transfer files are removed on every exit path.
//! Failures after `running` begins are never absorbed - a partially flashed
//! device must be visible to the operator.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::config::{defaults, Settings};
use crate::error::FlashError;
use crate::flash::device::DeviceMode;
use crate::flash::inventory::DeviceInventory;
use crate::flash::job::{FlashJob, FlashPhase, FlashProgress, FlashStatus, JobStore};
use crate::flash::storage::{self, StorageDevice, StorageKind};
use crate::infra::compress::{compress_gz, decompress_gz};
use crate::infra::runner::{ToolError, ToolRunner};

/// Progress observer threaded through a flash job
pub type FlashProgressFn = Arc<dyn Fn(&FlashProgress) + Send + Sync>;

/// Parameters of one flash request
#[derive(Debug, Clone)]
pub struct FlashRequest {
    /// Build that produced the image
    pub build_id: String,
    pub image_path: PathBuf,
    /// Device slot to flash, as reported by the inventory
    pub device_id: String,
    /// Storage target the image goes to
    pub storage: StorageKind,
}

/// Drives flash jobs against one attached device at a time
pub struct FlashEngine<R: ToolRunner> {
    settings: Settings,
    runner: Arc<R>,
    inventory: Arc<DeviceInventory<R>>,
    jobs: JobStore,
}

impl<R: ToolRunner> Clone for FlashEngine<R> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            runner: Arc::clone(&self.runner),
            inventory: Arc::clone(&self.inventory),
            jobs: self.jobs.clone(),
        }
    }
}

impl<R: ToolRunner> FlashEngine<R> {
    pub fn new(
        settings: Settings,
        runner: Arc<R>,
        inventory: Arc<DeviceInventory<R>>,
        jobs: JobStore,
    ) -> Self {
        Self {
            settings,
            runner,
            inventory,
            jobs,
        }
    }

    /// The job store shared with status queries
    pub fn jobs(&self) -> &JobStore {
        &self.jobs
    }

    /// Start a flash job. Returns the job id immediately; progress flows
    /// through `on_progress` and the job record.
    pub fn flash_image(&self, request: FlashRequest, on_progress: FlashProgressFn) -> String {
        let job_id = self.jobs.create(
            &request.build_id,
            &request.device_id,
            request.image_path.clone(),
        );

        let engine = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            engine.run_job(&id, request, on_progress).await;
        });

        job_id
    }

    /// Poll the store until the job reaches a terminal status or the
    /// timeout elapses.
    pub async fn wait(&self, job_id: &str, timeout: std::time::Duration) -> Option<FlashJob> {
        let deadline = Instant::now() + timeout;
        loop {
            match self.jobs.get(job_id) {
                Some(job) if job.status.is_terminal() => return Some(job),
                Some(_) if Instant::now() < deadline => {
                    tokio::time::sleep(std::time::Duration::from_millis(25)).await;
                }
                other => return other,
            }
        }
    }

    /// Probe storage targets behind `device_id`. Forces a fresh device
    /// detection first.
    pub async fn detect_storage(&self, device_id: &str) -> Result<Vec<StorageDevice>, FlashError> {
        let devices = self.inventory.detect(true).await;
        if !devices.iter().any(|d| d.id() == device_id) {
            return Err(FlashError::DeviceNotFound {
                device_id: device_id.to_string(),
            });
        }
        Ok(storage::detect_storage(self.runner.as_ref(), &self.settings.flash_tool).await)
    }

    /// Job wrapper: suspends inventory polling, runs the protocol, records
    /// the outcome. The suspension guard restores the prior polling state
    /// no matter how the job ends.
    async fn run_job(&self, job_id: &str, request: FlashRequest, on_progress: FlashProgressFn) {
        let _suspension = self.inventory.gate().suspend();

        self.jobs.update(job_id, |job| {
            job.status = FlashStatus::Running;
            job.started_at_ms = Some(crate::flash::job::unix_millis());
        });

        let reporter = ProgressReporter {
            jobs: self.jobs.clone(),
            job_id: job_id.to_string(),
            device_id: request.device_id.clone(),
            callback: on_progress,
        };

        match self.execute(&request, &reporter).await {
            Ok(()) => {
                self.jobs.update(job_id, |job| {
                    job.status = FlashStatus::Completed;
                    job.ended_at_ms = Some(crate::flash::job::unix_millis());
                });
            }
            Err(e) => {
                tracing::error!("flash job {job_id} failed: {e}");
                reporter.push(FlashPhase::Failed, 100, e.to_string());
                self.jobs.update(job_id, |job| {
                    job.status = FlashStatus::Failed;
                    job.ended_at_ms = Some(crate::flash::job::unix_millis());
                    job.error = Some(e.to_string());
                });
            }
        }
    }

    /// Protocol steps 2-10. Progress percentages follow the fixed windows:
    /// detecting 0-5, downloading_boot to 10, storage detection/selection to
    /// 15, compression regenerated into its 5-25 window, write 30-90, reset
    /// 95, done 100.
    async fn execute(
        &self,
        request: &FlashRequest,
        reporter: &ProgressReporter,
    ) -> Result<(), FlashError> {
        if !request.image_path.is_file() {
            return Err(FlashError::ImageMissing {
                path: request.image_path.clone(),
            });
        }

        let tool = self.settings.flash_tool.clone();

        reporter.push(FlashPhase::Detecting, 2, "searching for device");
        let devices = self.inventory.detect(true).await;
        let device = devices
            .iter()
            .find(|d| d.id() == request.device_id)
            .ok_or_else(|| FlashError::DeviceNotFound {
                device_id: request.device_id.clone(),
            })?;
        reporter.push(
            FlashPhase::Detecting,
            5,
            format!("found {} in {} mode", device.chip_family, device.mode),
        );

        // Maskrom devices need the bootloader pushed before storage access.
        if device.mode == DeviceMode::Maskrom {
            let loader = self.settings.loader_blob.clone();
            if !loader.is_file() {
                return Err(FlashError::LoaderMissing { path: loader });
            }
            reporter.push(FlashPhase::DownloadingBoot, 8, "pushing bootloader");
            let loader_str = loader.to_string_lossy();
            let output = self
                .runner
                .run(&tool, &["db", loader_str.as_ref()], defaults::LOADER_TIMEOUT)
                .await
                .map_err(|e| tool_failed("bootloader download", &e))?;
            if !output.success() {
                return Err(FlashError::ToolFailed {
                    step: "bootloader download".to_string(),
                    detail: output.combined(),
                });
            }
            // Give the device time to re-enumerate in loader mode.
            tokio::time::sleep(defaults::LOADER_SETTLE).await;
            reporter.push(
                FlashPhase::DownloadingBoot,
                10,
                "bootloader loaded, device settled",
            );
        }

        // Storage detection and selection are the head of the compound
        // writing phase.
        reporter.push(FlashPhase::Writing, 12, "detecting storage targets");
        let targets = storage::detect_storage(self.runner.as_ref(), &tool).await;
        let target = targets
            .iter()
            .find(|t| t.kind == request.storage && t.available)
            .ok_or(FlashError::StorageUnavailable {
                kind: request.storage,
            })?;

        let output = self
            .runner
            .run(&tool, &["cs", target.code], defaults::QUERY_TIMEOUT)
            .await
            .map_err(|e| tool_failed("storage select", &e))?;
        if !output.success() {
            return Err(FlashError::ToolFailed {
                step: "storage select".to_string(),
                detail: output.combined(),
            });
        }
        reporter.push(
            FlashPhase::Writing,
            15,
            match &target.capacity {
                Some(capacity) => format!("selected {} ({capacity})", target.kind),
                None => format!("selected {}", target.kind),
            },
        );

        // Large images are compressed first; the compressed copy is reused
        // on later jobs while it stays fresher than its source.
        let image_size = std::fs::metadata(&request.image_path)
            .map_err(|e| FlashError::Io {
                path: request.image_path.clone(),
                error: e.to_string(),
            })?
            .len();

        let mut temp_guard = None;
        let transfer_path = if image_size > defaults::COMPRESS_THRESHOLD_BYTES {
            let compressed = append_extension(&request.image_path, "gz");
            if !is_fresher(&compressed, &request.image_path) {
                self.compress_image(&request.image_path, &compressed, reporter)
                    .await?;
            } else {
                reporter.push(
                    FlashPhase::Compressing,
                    25,
                    "reusing fresh compressed image",
                );
            }

            // The tool needs raw bytes: unpack to a sibling temp file that
            // is removed whatever happens next.
            let temp = transfer_temp_path(&request.image_path, &reporter.job_id);
            reporter.push(FlashPhase::Writing, 28, "unpacking image for transfer");
            let guard = TempFile::new(temp.clone());
            let unpack_src = compressed.clone();
            let unpack_dst = temp.clone();
            tokio::task::spawn_blocking(move || decompress_gz(&unpack_src, &unpack_dst))
                .await
                .map_err(|e| FlashError::Io {
                    path: temp.clone(),
                    error: e.to_string(),
                })?
                .map_err(|e| FlashError::Io {
                    path: temp.clone(),
                    error: e.to_string(),
                })?;
            temp_guard = Some(guard);
            temp
        } else {
            request.image_path.clone()
        };

        reporter.push(
            FlashPhase::Writing,
            30,
            format!("writing image to {}", target.kind),
        );
        let write_started = Instant::now();
        let transfer_str = transfer_path.to_string_lossy();
        let result = self
            .runner
            .run(
                &tool,
                &["wl", "0", transfer_str.as_ref()],
                defaults::WRITE_TIMEOUT,
            )
            .await;
        let output = match result {
            Ok(output) => output,
            Err(ToolError::TimedOut { timeout, .. }) => {
                return Err(FlashError::WriteTimeout { timeout });
            }
            Err(e) => return Err(tool_failed("image write", &e)),
        };
        if !output.success() {
            return Err(FlashError::ToolFailed {
                step: "image write".to_string(),
                detail: output.combined(),
            });
        }

        let elapsed = write_started.elapsed().as_secs().max(1);
        let mut entry = FlashProgress::now(FlashPhase::Writing, 90, "write complete")
            .for_device(&reporter.device_id);
        entry.speed_bps = Some(image_size / elapsed);
        reporter.push_entry(entry);

        // Temp transfer file is no longer needed; drop deletes it.
        drop(temp_guard);

        // Reset failure is a warning: the device usually disconnects the
        // moment the reset lands.
        reporter.push(FlashPhase::Resetting, 95, "resetting device");
        match self
            .runner
            .run(&tool, &["rd"], defaults::QUERY_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => {}
            Ok(output) => {
                let warning = FlashError::ResetFailed {
                    error: output.combined(),
                };
                tracing::warn!("{warning}");
            }
            Err(e) => {
                let warning = FlashError::ResetFailed {
                    error: e.to_string(),
                };
                tracing::warn!("{warning}");
            }
        }

        reporter.push(FlashPhase::Completed, 100, "flash complete");
        Ok(())
    }

    /// Gzip the image off the async runtime, mapping compression's own
    /// 0-100 into the 5-25 window of job progress.
    async fn compress_image(
        &self,
        src: &Path,
        dst: &Path,
        reporter: &ProgressReporter,
    ) -> Result<(), FlashError> {
        let src = src.to_path_buf();
        let dst_owned = dst.to_path_buf();
        let blocking_reporter = reporter.clone();

        let result = tokio::task::spawn_blocking(move || {
            let last_mapped = AtomicU8::new(u8::MAX);
            let progress = |consumed: u64, total: u64| {
                let sub = if total > 0 {
                    (consumed * 100 / total) as u8
                } else {
                    0
                };
                let mapped = 5 + (u16::from(sub) * 20 / 100) as u8;
                if last_mapped.swap(mapped, Ordering::Relaxed) != mapped {
                    blocking_reporter.push(
                        FlashPhase::Compressing,
                        mapped,
                        format!("compressing image ({sub}%)"),
                    );
                }
            };
            compress_gz(&src, &dst_owned, Some(&progress))
        })
        .await;

        match result {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(FlashError::Io {
                path: dst.to_path_buf(),
                error: e.to_string(),
            }),
            Err(e) => Err(FlashError::Io {
                path: dst.to_path_buf(),
                error: e.to_string(),
            }),
        }
    }
}

/// Appends job-store and callback reporting into one call
#[derive(Clone)]
struct ProgressReporter {
    jobs: JobStore,
    job_id: String,
    device_id: String,
    callback: FlashProgressFn,
}

impl ProgressReporter {
    fn push(&self, phase: FlashPhase, percent: u8, message: impl Into<String>) {
        self.push_entry(FlashProgress::now(phase, percent, message).for_device(&self.device_id));
    }

    fn push_entry(&self, entry: FlashProgress) {
        self.jobs.update(&self.job_id, |job| {
            job.progress.push(entry.clone());
        });
        (self.callback)(&entry);
    }
}

/// Sibling temp file removed on drop, whatever the outcome
struct TempFile {
    path: PathBuf,
}

impl TempFile {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("temp file cleanup failed for {}: {e}", self.path.display());
            }
        }
    }
}

fn tool_failed(step: &str, error: &ToolError) -> FlashError {
    FlashError::ToolFailed {
        step: step.to_string(),
        detail: error.to_string(),
    }
}

/// `/path/image.img` + `gz` → `/path/image.img.gz`
fn append_extension(path: &Path, extension: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(extension);
    PathBuf::from(name)
}

fn transfer_temp_path(image: &Path, job_id: &str) -> PathBuf {
    let parent = image.parent().unwrap_or_else(|| Path::new("."));
    parent.join(format!(".{job_id}.transfer.img"))
}

/// True when `candidate` exists and is newer than `source` by mtime.
fn is_fresher(candidate: &Path, source: &Path) -> bool {
    let Ok(candidate_meta) = std::fs::metadata(candidate) else {
        return false;
    };
    let Ok(source_meta) = std::fs::metadata(source) else {
        return false;
    };
    match (candidate_meta.modified(), source_meta.modified()) {
        (Ok(candidate_time), Ok(source_time)) => candidate_time > source_time,
        _ => false,
    }
}

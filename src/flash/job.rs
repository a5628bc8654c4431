//! Flash job records
//!
//! In-memory, append-only job state. Jobs are created when a flash is
//! requested, mutated only by the flash engine, and retained for the process
//! lifetime; persistence, if anyone wants it, belongs to an external
//! tracker.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Sub-state of a running flash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashPhase {
    Detecting,
    Preparing,
    DownloadingBoot,
    Compressing,
    Erasing,
    Writing,
    Verifying,
    Resetting,
    Completed,
    Failed,
}

/// Lifecycle state of a flash job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FlashStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl FlashStatus {
    /// Whether the job has finished, one way or the other
    pub fn is_terminal(&self) -> bool {
        matches!(self, FlashStatus::Completed | FlashStatus::Failed)
    }
}

/// One append-only progress entry
#[derive(Debug, Clone, Serialize)]
pub struct FlashProgress {
    pub phase: FlashPhase,
    /// 0-100 within the job (sub-phases map into their parent window)
    pub percent: u8,
    pub message: String,
    /// Unix milliseconds, stamped when the entry is created
    pub timestamp_ms: u64,
    pub device_id: Option<String>,
    /// Transfer speed in bytes/second, when measurable
    pub speed_bps: Option<u64>,
    /// Estimated seconds remaining, when measurable
    pub eta_seconds: Option<u64>,
}

impl FlashProgress {
    /// Entry stamped with the current time
    pub fn now(phase: FlashPhase, percent: u8, message: impl Into<String>) -> Self {
        Self {
            phase,
            percent: percent.min(100),
            message: message.into(),
            timestamp_ms: unix_millis(),
            device_id: None,
            speed_bps: None,
            eta_seconds: None,
        }
    }

    /// Attach the device id this entry refers to
    pub fn for_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }
}

/// One flash job's full record
#[derive(Debug, Clone, Serialize)]
pub struct FlashJob {
    pub id: String,
    /// Build that produced the image being flashed
    pub build_id: String,
    pub device_id: String,
    pub image_path: PathBuf,
    pub status: FlashStatus,
    /// Ordered progress log; entries are only ever appended
    pub progress: Vec<FlashProgress>,
    pub started_at_ms: Option<u64>,
    pub ended_at_ms: Option<u64>,
    pub error: Option<String>,
}

impl FlashJob {
    /// Latest progress entry, if any
    pub fn last_progress(&self) -> Option<&FlashProgress> {
        self.progress.last()
    }
}

/// Process-lifetime store of flash jobs, keyed by job id.
///
/// Reads interleave safely with an in-progress flash because the engine only
/// appends to a job, never rewrites its history.
#[derive(Clone, Default)]
pub struct JobStore {
    jobs: Arc<Mutex<HashMap<String, FlashJob>>>,
}

static JOB_SEQ: AtomicU64 = AtomicU64::new(1);

impl JobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a queued job and return its id.
    pub fn create(&self, build_id: &str, device_id: &str, image_path: PathBuf) -> String {
        let id = format!(
            "flash-{}-{}",
            unix_millis(),
            JOB_SEQ.fetch_add(1, Ordering::Relaxed)
        );
        let job = FlashJob {
            id: id.clone(),
            build_id: build_id.to_string(),
            device_id: device_id.to_string(),
            image_path,
            status: FlashStatus::Queued,
            progress: Vec::new(),
            started_at_ms: None,
            ended_at_ms: None,
            error: None,
        };
        self.jobs
            .lock()
            .expect("job store poisoned")
            .insert(id.clone(), job);
        id
    }

    /// Snapshot of one job
    pub fn get(&self, id: &str) -> Option<FlashJob> {
        self.jobs.lock().expect("job store poisoned").get(id).cloned()
    }

    /// Snapshot of all jobs, oldest first
    pub fn list(&self) -> Vec<FlashJob> {
        let mut jobs: Vec<FlashJob> = self
            .jobs
            .lock()
            .expect("job store poisoned")
            .values()
            .cloned()
            .collect();
        jobs.sort_by(|a, b| a.id.cmp(&b.id));
        jobs
    }

    /// Apply a mutation to one job under the lock.
    pub(crate) fn update<F: FnOnce(&mut FlashJob)>(&self, id: &str, mutate: F) {
        if let Some(job) = self.jobs.lock().expect("job store poisoned").get_mut(id) {
            mutate(job);
        }
    }
}

/// Milliseconds since the Unix epoch
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_and_get_job() {
        let store = JobStore::new();
        let id = store.create("build-1", "1", PathBuf::from("/tmp/image.img"));

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, FlashStatus::Queued);
        assert_eq!(job.build_id, "build-1");
        assert!(job.progress.is_empty());
    }

    #[test]
    fn test_job_ids_are_unique() {
        let store = JobStore::new();
        let a = store.create("b", "1", PathBuf::from("/tmp/a.img"));
        let b = store.create("b", "1", PathBuf::from("/tmp/b.img"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_update_appends_progress() {
        let store = JobStore::new();
        let id = store.create("b", "1", PathBuf::from("/tmp/a.img"));

        store.update(&id, |job| {
            job.status = FlashStatus::Running;
            job.progress
                .push(FlashProgress::now(FlashPhase::Detecting, 2, "searching"));
        });

        let job = store.get(&id).unwrap();
        assert_eq!(job.status, FlashStatus::Running);
        assert_eq!(job.progress.len(), 1);
        assert_eq!(job.last_progress().unwrap().phase, FlashPhase::Detecting);
    }

    #[test]
    fn test_progress_entries_are_stamped() {
        let entry = FlashProgress::now(FlashPhase::Writing, 50, "writing");
        assert!(entry.timestamp_ms > 0);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(FlashStatus::Completed.is_terminal());
        assert!(FlashStatus::Failed.is_terminal());
        assert!(!FlashStatus::Running.is_terminal());
        assert!(!FlashStatus::Queued.is_terminal());
    }

    #[test]
    fn test_percent_is_clamped() {
        let entry = FlashProgress::now(FlashPhase::Completed, 150, "done");
        assert_eq!(entry.percent, 100);
    }
}

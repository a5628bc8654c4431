//! CLI command implementation for `rockforge flash`

use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use crate::cli::output::{create_percent_bar, is_json, print_success};
use crate::config::{defaults, Settings};
use crate::flash::engine::{FlashEngine, FlashProgressFn, FlashRequest};
use crate::flash::gate::DetectionGate;
use crate::flash::inventory::DeviceInventory;
use crate::flash::job::{FlashStatus, JobStore};
use crate::flash::storage::StorageKind;
use crate::infra::runner::{DemoRunner, SystemRunner, ToolRunner};

/// Execute the flash command
pub async fn execute(
    image: &Path,
    device: &str,
    storage: StorageKind,
    build_id: &str,
    yes: bool,
) -> Result<()> {
    let settings = Settings::from_env();

    if !image.is_file() {
        bail!("Image not found: {}", image.display());
    }

    if !yes {
        require_confirmation(device, storage)?;
    }

    let request = FlashRequest {
        build_id: build_id.to_string(),
        image_path: image.to_path_buf(),
        device_id: device.to_string(),
        storage,
    };

    if settings.demo_mode {
        run_flash(settings, Arc::new(DemoRunner::new()), request).await
    } else {
        run_flash(settings, Arc::new(SystemRunner), request).await
    }
}

async fn run_flash<R: ToolRunner>(
    settings: Settings,
    runner: Arc<R>,
    request: FlashRequest,
) -> Result<()> {
    let gate = Arc::new(DetectionGate::default());
    let inventory = Arc::new(DeviceInventory::new(&settings, runner.clone(), gate));
    let engine = FlashEngine::new(settings, runner, inventory, JobStore::new());

    let bar = create_percent_bar("starting flash");
    let bar_progress = bar.clone();
    let on_progress: FlashProgressFn = Arc::new(move |entry| {
        bar_progress.set_position(u64::from(entry.percent));
        bar_progress.set_message(entry.message.clone());
    });

    let job_id = engine.flash_image(request, on_progress);
    // Bounded by the write timeout plus slack for compression of large
    // images.
    let job = engine
        .wait(&job_id, defaults::WRITE_TIMEOUT * 2)
        .await
        .context("Flash job disappeared from the store")?;
    bar.finish_and_clear();

    if is_json() {
        println!("{}", serde_json::to_string_pretty(&job).unwrap_or_default());
    }

    match job.status {
        FlashStatus::Completed => {
            print_success(&format!("Flash {job_id} completed"));
            Ok(())
        }
        FlashStatus::Failed => {
            bail!(
                "Flash {job_id} failed: {}",
                job.error.as_deref().unwrap_or("unknown error")
            )
        }
        other => bail!("Flash {job_id} did not finish (status {other:?})"),
    }
}

/// Flashing destroys whatever is on the target; ask first.
fn require_confirmation(device: &str, storage: StorageKind) -> Result<()> {
    eprintln!();
    eprintln!(
        "⚠️  WARNING: This will overwrite {} on device {device}!",
        storage.description()
    );
    eprintln!("   This operation may cause data loss!");
    eprintln!();
    eprint!("   Are you sure you want to continue? [y/N] ");
    io::stderr().flush()?;

    if !io::stdin().is_terminal() {
        bail!(
            "Cannot prompt for confirmation in non-interactive mode.\n\
             Use --yes to skip confirmation."
        );
    }

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    let input = input.trim().to_lowercase();
    if input != "y" && input != "yes" {
        bail!("Flash cancelled by user.");
    }

    Ok(())
}

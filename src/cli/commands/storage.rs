//! CLI command implementation for `rockforge storage`

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::output::{is_json, print_detail, print_info};
use crate::config::Settings;
use crate::flash::engine::FlashEngine;
use crate::flash::gate::DetectionGate;
use crate::flash::inventory::DeviceInventory;
use crate::flash::job::JobStore;
use crate::infra::runner::{DemoRunner, SystemRunner, ToolRunner};

/// Execute the storage command
pub async fn execute(device: &str) -> Result<()> {
    let settings = Settings::from_env();

    if settings.demo_mode {
        run_storage(settings, Arc::new(DemoRunner::new()), device).await
    } else {
        run_storage(settings, Arc::new(SystemRunner), device).await
    }
}

async fn run_storage<R: ToolRunner>(
    settings: Settings,
    runner: Arc<R>,
    device: &str,
) -> Result<()> {
    let gate = Arc::new(DetectionGate::default());
    let inventory = Arc::new(DeviceInventory::new(&settings, runner.clone(), gate));
    let engine = FlashEngine::new(settings, runner, inventory, JobStore::new());

    let targets = engine
        .detect_storage(device)
        .await
        .with_context(|| format!("Storage detection failed for device {device}"))?;

    if is_json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&targets).unwrap_or_default()
        );
        return Ok(());
    }

    print_info(&format!("Storage targets on device {device}:"));
    for target in &targets {
        let availability = if target.available {
            target.capacity.clone().unwrap_or_else(|| "available".to_string())
        } else {
            "not present".to_string()
        };
        let marker = if target.recommended { "  [recommended]" } else { "" };
        print_detail(&format!(
            "{:<7} {availability}{marker}  ({})",
            target.kind.to_string(),
            target.description
        ));
    }

    Ok(())
}

//! CLI command implementation for `rockforge devices`

use std::sync::Arc;

use anyhow::Result;

use crate::cli::output::{is_json, print_detail, print_info};
use crate::config::Settings;
use crate::flash::gate::DetectionGate;
use crate::flash::inventory::DeviceInventory;
use crate::infra::runner::{DemoRunner, SystemRunner, ToolRunner};

/// Execute the devices command
pub async fn execute(force: bool) -> Result<()> {
    let settings = Settings::from_env();

    if settings.demo_mode {
        run_devices(settings, Arc::new(DemoRunner::new()), force).await
    } else {
        run_devices(settings, Arc::new(SystemRunner), force).await
    }
}

async fn run_devices<R: ToolRunner>(
    settings: Settings,
    runner: Arc<R>,
    force: bool,
) -> Result<()> {
    let gate = Arc::new(DetectionGate::default());
    let inventory = DeviceInventory::new(&settings, runner, gate);
    let devices = inventory.detect(force).await;

    if is_json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&devices).unwrap_or_default()
        );
        return Ok(());
    }

    if devices.is_empty() {
        print_info(
            "No devices in recovery mode. Hold the maskrom/recovery button while powering on.",
        );
        return Ok(());
    }

    print_info(&format!("{} device(s) in recovery mode:", devices.len()));
    for device in &devices {
        print_detail(&format!(
            "#{}  {}  {} mode  (usb {})",
            device.device_number, device.chip_family, device.mode, device.usb_id
        ));
    }

    Ok(())
}

//! Device inventory
//!
//! Rate-limited polling of attached recovery-mode devices. Unforced calls go
//! through the [`DetectionGate`] so that background pollers cannot contend
//! with a flash in progress on the same USB bus; a forced call always
//! executes. Tool failures of any kind mean "no devices" - absence is a
//! normal state while a board power-cycles.

use std::sync::Arc;

use crate::config::{defaults, Settings};
use crate::flash::device::{parse_inventory, RockchipDevice};
use crate::flash::gate::DetectionGate;
use crate::infra::runner::ToolRunner;

/// Enumerates attached recovery-mode devices
pub struct DeviceInventory<R: ToolRunner> {
    runner: Arc<R>,
    gate: Arc<DetectionGate>,
    flash_tool: String,
}

impl<R: ToolRunner> DeviceInventory<R> {
    pub fn new(settings: &Settings, runner: Arc<R>, gate: Arc<DetectionGate>) -> Self {
        Self {
            runner,
            gate,
            flash_tool: settings.flash_tool.clone(),
        }
    }

    /// The gate shared with the flash engine
    pub fn gate(&self) -> &Arc<DetectionGate> {
        &self.gate
    }

    /// List attached devices.
    ///
    /// Returns an empty list without touching hardware when detection is
    /// disabled or the cooldown has not elapsed, unless `force` is set.
    pub async fn detect(&self, force: bool) -> Vec<RockchipDevice> {
        if !self.gate.try_probe(force) {
            tracing::trace!("inventory probe gated off");
            return Vec::new();
        }

        match self
            .runner
            .run(&self.flash_tool, &["ld"], defaults::QUERY_TIMEOUT)
            .await
        {
            Ok(output) if output.success() => parse_inventory(&output.stdout),
            Ok(output) => {
                tracing::debug!("inventory tool exited nonzero: {}", output.combined());
                Vec::new()
            }
            Err(e) => {
                tracing::debug!("inventory tool unavailable: {e}");
                Vec::new()
            }
        }
    }
}

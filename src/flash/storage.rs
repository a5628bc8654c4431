//! Storage target detection
//!
//! Probes the storage media reachable behind a loader-mode device by
//! switching the tool's active storage context per fixed kind code and
//! querying flash info. The result is rebuilt on every call; physical media
//! can change between jobs, so nothing is cached.

use regex::Regex;
use serde::Serialize;

use crate::config::defaults;
use crate::infra::runner::ToolRunner;

/// Storage targets a Rockchip device can expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// Onboard eMMC flash
    Emmc,
    /// Removable SD card
    Sd,
    /// Small boot-only SPI-NOR flash
    SpiNor,
}

impl StorageKind {
    /// Tool-specific storage selector code
    pub fn code(&self) -> &'static str {
        match self {
            StorageKind::Emmc => "1",
            StorageKind::Sd => "2",
            StorageKind::SpiNor => "9",
        }
    }

    /// All kinds, in probe order
    pub fn all() -> [StorageKind; 3] {
        [StorageKind::Emmc, StorageKind::Sd, StorageKind::SpiNor]
    }

    /// Human description
    pub fn description(&self) -> &'static str {
        match self {
            StorageKind::Emmc => "onboard eMMC flash",
            StorageKind::Sd => "SD card",
            StorageKind::SpiNor => "SPI-NOR boot flash",
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            StorageKind::Emmc => "emmc",
            StorageKind::Sd => "sd",
            StorageKind::SpiNor => "spinor",
        };
        f.write_str(label)
    }
}

impl std::str::FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "emmc" => Ok(StorageKind::Emmc),
            "sd" => Ok(StorageKind::Sd),
            "spinor" | "spi-nor" | "nor" => Ok(StorageKind::SpiNor),
            other => Err(format!(
                "unknown storage target '{other}' (expected emmc, sd, or spinor)"
            )),
        }
    }
}

/// One probed storage target; rebuilt on every detection call
#[derive(Debug, Clone, Serialize)]
pub struct StorageDevice {
    pub kind: StorageKind,
    /// Tool selector code used to address this target
    pub code: &'static str,
    pub available: bool,
    /// Best-effort parsed capacity, e.g. "14.6 GB"
    pub capacity: Option<String>,
    /// Preferred target among the available ones
    pub recommended: bool,
    pub description: &'static str,
}

/// Probe every storage kind through the flashing tool.
pub async fn detect_storage<R: ToolRunner>(
    runner: &R,
    flash_tool: &str,
) -> Vec<StorageDevice> {
    let mut devices = Vec::new();

    for kind in StorageKind::all() {
        let (available, capacity) = probe_kind(runner, flash_tool, kind).await;
        devices.push(StorageDevice {
            kind,
            code: kind.code(),
            available,
            capacity,
            recommended: false,
            description: kind.description(),
        });
    }

    // eMMC is the preferred target when present; otherwise the first
    // available kind wins.
    if let Some(first_available) = devices.iter().position(|d| d.available) {
        devices[first_available].recommended = true;
    }

    devices
}

/// Switch the active storage context, then query flash info.
async fn probe_kind<R: ToolRunner>(
    runner: &R,
    flash_tool: &str,
    kind: StorageKind,
) -> (bool, Option<String>) {
    let switched = runner
        .run(flash_tool, &["cs", kind.code()], defaults::QUERY_TIMEOUT)
        .await;
    match switched {
        Ok(output) if output.success() => {}
        Ok(output) => {
            tracing::debug!("storage switch to {kind} refused: {}", output.combined());
            return (false, None);
        }
        Err(e) => {
            tracing::debug!("storage switch to {kind} failed: {e}");
            return (false, None);
        }
    }

    match runner
        .run(flash_tool, &["rfi"], defaults::QUERY_TIMEOUT)
        .await
    {
        Ok(output) if output.success() => (true, parse_capacity(&output.stdout)),
        Ok(output) => {
            tracing::debug!("flash info for {kind} unavailable: {}", output.combined());
            (false, None)
        }
        Err(e) => {
            tracing::debug!("flash info for {kind} failed: {e}");
            (false, None)
        }
    }
}

/// Pull a capacity string out of `rfi` output, best-effort.
fn parse_capacity(output: &str) -> Option<String> {
    let pattern = Regex::new(r"Flash Size:\s*([0-9.]+\s*[KMGT]?i?B)").expect("static regex");
    pattern
        .captures(output)
        .map(|captures| captures[1].trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_selector_codes() {
        assert_eq!(StorageKind::Emmc.code(), "1");
        assert_eq!(StorageKind::Sd.code(), "2");
        assert_eq!(StorageKind::SpiNor.code(), "9");
    }

    #[test]
    fn test_from_str_accepts_spellings() {
        assert_eq!(StorageKind::from_str("emmc").unwrap(), StorageKind::Emmc);
        assert_eq!(StorageKind::from_str("SD").unwrap(), StorageKind::Sd);
        assert_eq!(StorageKind::from_str("spi-nor").unwrap(), StorageKind::SpiNor);
        assert!(StorageKind::from_str("floppy").is_err());
    }

    #[test]
    fn test_parse_capacity_from_rfi_output() {
        let output = "Flash Info:\n\tManufacturer: SAMSUNG\n\tFlash Size: 14.6 GB\n";
        assert_eq!(parse_capacity(output), Some("14.6 GB".to_string()));
    }

    #[test]
    fn test_parse_capacity_absent() {
        assert_eq!(parse_capacity("Flash Info:\n\tManufacturer: X\n"), None);
        assert_eq!(parse_capacity(""), None);
    }
}

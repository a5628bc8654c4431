//! Rockchip recovery-mode device model
//!
//! Parses the flashing tool's device listing into [`RockchipDevice`] values.
//! Devices are transient: the slot number is only meaningful until the next
//! reconnect, so nothing here is ever persisted.

use regex::Regex;
use serde::Serialize;

/// USB recovery mode a device was enumerated in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceMode {
    /// No bootloader present; accepts a bootloader push
    Maskrom,
    /// Bootloader running; accepts full storage writes
    Loader,
    Fastboot,
}

impl DeviceMode {
    fn parse(token: &str) -> Option<Self> {
        match token.to_ascii_lowercase().as_str() {
            "maskrom" => Some(DeviceMode::Maskrom),
            "loader" => Some(DeviceMode::Loader),
            "fastboot" => Some(DeviceMode::Fastboot),
            _ => None,
        }
    }
}

impl std::fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            DeviceMode::Maskrom => "maskrom",
            DeviceMode::Loader => "loader",
            DeviceMode::Fastboot => "fastboot",
        };
        f.write_str(label)
    }
}

/// One attached recovery-mode device, valid for a single inventory poll
#[derive(Debug, Clone, Serialize)]
pub struct RockchipDevice {
    /// Device slot number; not stable across reconnects
    pub device_number: u32,
    pub mode: DeviceMode,
    /// Chip family derived from the USB product id
    pub chip_family: &'static str,
    /// USB vendor:product id as listed
    pub usb_id: String,
    /// Free-text status line
    pub status: String,
}

impl RockchipDevice {
    /// Identifier the flash engine matches requests against
    pub fn id(&self) -> String {
        self.device_number.to_string()
    }
}

/// USB product id to chip family. Unknown ids map to "Unknown" rather than
/// erroring; new chips appear faster than lookup tables are updated.
pub fn chip_family(product_id: u16) -> &'static str {
    match product_id {
        0x281a => "RK2818",
        0x300a => "RK3066",
        0x301a => "RK3036",
        0x310b => "RK3188",
        0x310c => "RK312X",
        0x320a => "RK3288",
        0x320b => "RK322X",
        0x320c => "RK3328",
        0x330a => "RK3368",
        0x330c => "RK3399",
        0x330d => "PX30",
        0x330e => "RK3308",
        0x350a => "RK3568",
        0x350b => "RK3588",
        0x350e => "RK3528",
        0x350f => "RK3562",
        _ => "Unknown",
    }
}

/// Parse the tool's line-oriented device listing.
///
/// Expected shape per line:
/// `DevNo=1	Vid=0x2207,Pid=0x350b,LocationID=101	Maskrom`
pub fn parse_inventory(output: &str) -> Vec<RockchipDevice> {
    let pattern = Regex::new(
        r"DevNo=(\d+)\s+Vid=0x([0-9a-fA-F]+),Pid=0x([0-9a-fA-F]+)\S*\s+(\S+)",
    )
    .expect("static regex");

    let mut devices = Vec::new();
    for line in output.lines() {
        let Some(captures) = pattern.captures(line) else {
            continue;
        };
        let Some(mode) = DeviceMode::parse(&captures[4]) else {
            continue;
        };
        let Ok(device_number) = captures[1].parse::<u32>() else {
            continue;
        };
        let product_id = u16::from_str_radix(&captures[3], 16).unwrap_or(0);

        devices.push(RockchipDevice {
            device_number,
            mode,
            chip_family: chip_family(product_id),
            usb_id: format!("{}:{}", &captures[2], &captures[3]),
            status: line.trim().to_string(),
        });
    }
    devices
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_single_maskrom_device() {
        let output = "DevNo=1\tVid=0x2207,Pid=0x350b,LocationID=101\tMaskrom\n";
        let devices = parse_inventory(output);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].device_number, 1);
        assert_eq!(devices[0].mode, DeviceMode::Maskrom);
        assert_eq!(devices[0].chip_family, "RK3588");
        assert_eq!(devices[0].usb_id, "2207:350b");
    }

    #[test]
    fn test_parse_multiple_devices_and_modes() {
        let output = "DevNo=1\tVid=0x2207,Pid=0x330c,LocationID=101\tMaskrom\n\
                      DevNo=2\tVid=0x2207,Pid=0x350a,LocationID=102\tLoader\n";
        let devices = parse_inventory(output);
        assert_eq!(devices.len(), 2);
        assert_eq!(devices[0].chip_family, "RK3399");
        assert_eq!(devices[1].mode, DeviceMode::Loader);
        assert_eq!(devices[1].chip_family, "RK3568");
    }

    #[test]
    fn test_unknown_product_id_maps_to_unknown() {
        let output = "DevNo=1\tVid=0x2207,Pid=0xdead,LocationID=101\tLoader\n";
        let devices = parse_inventory(output);
        assert_eq!(devices[0].chip_family, "Unknown");
    }

    #[test]
    fn test_noise_lines_are_skipped() {
        let output = "not a device line\nDevNo=zzz\tVid=0x2207,Pid=0x350b\tMaskrom\n";
        assert!(parse_inventory(output).is_empty());
    }

    #[test]
    fn test_unrecognized_mode_is_skipped() {
        let output = "DevNo=1\tVid=0x2207,Pid=0x350b,LocationID=101\tMsc\n";
        assert!(parse_inventory(output).is_empty());
    }

    #[test]
    fn test_empty_output_yields_no_devices() {
        assert!(parse_inventory("").is_empty());
        assert!(parse_inventory("\n\n").is_empty());
    }
}

//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod devices;
pub mod doctor;
pub mod flash;
pub mod storage;

use std::path::PathBuf;

use anyhow::Result;
use clap::Subcommand;

use crate::flash::storage::StorageKind;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Build a board image from a configuration file
    Build {
        /// Path to the build configuration (TOML)
        #[arg(short, long, default_value = "rockforge.toml")]
        config: PathBuf,

        /// Build identifier (generated when omitted)
        #[arg(long)]
        build_id: Option<String>,
    },

    /// Flash an image to an attached recovery-mode device
    Flash {
        /// Image file to flash
        #[arg(short, long)]
        image: PathBuf,

        /// Device slot number, as printed by `devices`
        #[arg(short, long)]
        device: String,

        /// Storage target to write to
        #[arg(short, long, default_value = "emmc")]
        storage: StorageKind,

        /// Build id the image belongs to (for the job record)
        #[arg(long, default_value = "adhoc")]
        build_id: String,

        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// List attached recovery-mode devices
    Devices {
        /// Probe even when the detection cooldown has not elapsed
        #[arg(short, long)]
        force: bool,
    },

    /// Probe the storage targets behind a device
    Storage {
        /// Device slot number, as printed by `devices`
        #[arg(short, long)]
        device: String,
    },

    /// Check that the required tools and directories are in place
    Doctor,
}

impl Commands {
    /// Execute the command
    pub async fn run(self) -> Result<()> {
        match self {
            Self::Build { config, build_id } => build::execute(&config, build_id).await,
            Self::Flash {
                image,
                device,
                storage,
                build_id,
                yes,
            } => flash::execute(&image, &device, storage, &build_id, yes).await,
            Self::Devices { force } => devices::execute(force).await,
            Self::Storage { device } => storage::execute(&device).await,
            Self::Doctor => doctor::execute().await,
        }
    }
}

//! Environment-driven runtime settings
//!
//! Resolves the directories and tool paths the pipeline and flash engine
//! operate on. Environment variables override platform defaults:
//! - `ROCKFORGE_BUILD_DIR` - Base directory for build working directories
//! - `ROCKFORGE_CACHE_DIR` - Download cache directory
//! - `ROCKFORGE_FLASH_TOOL` - Path to the rkdeveloptool binary
//! - `ROCKFORGE_LOADER` - Path to the bootloader blob pushed to maskrom devices
//! - `ROCKFORGE_DEMO` - Set to `1`/`true` for offline demo mode

use std::env;
use std::path::PathBuf;

/// Environment variable names for overrides
pub const ENV_BUILD_DIR: &str = "ROCKFORGE_BUILD_DIR";
pub const ENV_CACHE_DIR: &str = "ROCKFORGE_CACHE_DIR";
pub const ENV_FLASH_TOOL: &str = "ROCKFORGE_FLASH_TOOL";
pub const ENV_LOADER: &str = "ROCKFORGE_LOADER";
pub const ENV_DEMO: &str = "ROCKFORGE_DEMO";

/// Application name used in directory paths
const APP_NAME: &str = "rockforge";

/// Runtime settings for the build pipeline and flash engine
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base directory under which per-build working directories are created
    pub build_dir: PathBuf,
    /// Download cache directory for base images
    pub cache_dir: PathBuf,
    /// Flashing tool binary (name or absolute path)
    pub flash_tool: String,
    /// Bootloader blob pushed to maskrom-mode devices
    pub loader_blob: PathBuf,
    /// Offline demo mode: no network, no hardware
    pub demo_mode: bool,
}

impl Settings {
    /// Resolve settings from the environment, falling back to platform
    /// defaults for directories.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            build_dir: env_path(ENV_BUILD_DIR).unwrap_or_else(default_build_dir),
            cache_dir: env_path(ENV_CACHE_DIR).unwrap_or_else(default_cache_dir),
            flash_tool: env::var(ENV_FLASH_TOOL).unwrap_or_else(|_| "rkdeveloptool".to_string()),
            loader_blob: env_path(ENV_LOADER)
                .unwrap_or_else(|| default_data_dir().join("loader").join("rk35xx_loader.bin")),
            demo_mode: env::var(ENV_DEMO)
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    /// Working directory for one build job
    #[must_use]
    pub fn work_dir(&self, build_id: &str) -> PathBuf {
        self.build_dir.join(build_id)
    }
}

fn env_path(name: &str) -> Option<PathBuf> {
    env::var(name).ok().map(PathBuf::from)
}

fn default_build_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join(APP_NAME).join("builds"))
        .unwrap_or_else(|| PathBuf::from(".").join("builds"))
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|p| p.join(APP_NAME).join("images"))
        .unwrap_or_else(|| PathBuf::from(".").join(".cache").join(APP_NAME))
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|p| p.join(APP_NAME))
        .unwrap_or_else(|| PathBuf::from(".").join(".local").join("share").join(APP_NAME))
}

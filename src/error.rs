//! Error types for rockforge
//!
//! Domain-specific error types using thiserror.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::flash::storage::StorageKind;

/// Archive resolution errors
#[derive(Error, Debug)]
pub enum ResolveError {
    /// No image matched after exhausting the archive and all name variants
    #[error("No image found for board '{board}' release '{release}' in the archive")]
    ImageNotFound { board: String, release: String },

    /// Network error while probing the archive
    #[error("Network error fetching '{url}': {error}")]
    Network { url: String, error: String },

    /// Redirect chain exceeded the hop limit
    #[error("Too many redirects resolving '{url}'")]
    TooManyRedirects { url: String },
}

/// Image acquisition errors
///
/// These are absorbed into the placeholder fallback by the pipeline; they
/// surface individually only in logs and step reporting.
#[derive(Error, Debug)]
pub enum AcquireError {
    /// Download failed
    #[error("Network failure downloading '{url}': {error}")]
    NetworkFailure { url: String, error: String },

    /// A stage produced a zero-byte file
    #[error("Integrity failure: '{path}' is zero bytes")]
    IntegrityFailure { path: PathBuf },

    /// Every decompression strategy was exhausted
    #[error("No decompression strategy could handle '{path}'")]
    DecompressionUnavailable { path: PathBuf },

    /// Archive resolution failed
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Image injection errors
#[derive(Error, Debug)]
pub enum InjectError {
    /// Privileged mounting is not permitted (non-fatal, triggers the
    /// external-package strategy)
    #[error("Passwordless privilege for '{tool}' denied")]
    PrivilegeDenied { tool: String },

    /// Partition mapping failed
    #[error("Failed to map partitions of '{image}': {error}")]
    MappingFailed { image: PathBuf, error: String },

    /// Mounting the root partition failed
    #[error("Failed to mount '{device}': {error}")]
    MountFailed { device: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Flash engine errors
#[derive(Error, Debug)]
pub enum FlashError {
    /// The requested device was not present in a forced detection pass
    #[error("Device '{device_id}' not found in recovery mode")]
    DeviceNotFound { device_id: String },

    /// The requested storage target was not detected as available
    #[error("Storage target '{kind}' is not available on this device")]
    StorageUnavailable { kind: StorageKind },

    /// The raw write command exceeded its timeout
    #[error("Write command timed out after {timeout:?}")]
    WriteTimeout { timeout: Duration },

    /// Device reset failed (logged as a warning, never a job failure)
    #[error("Device reset failed: {error}")]
    ResetFailed { error: String },

    /// The bootloader blob required for maskrom devices is missing
    #[error("Bootloader blob not found at '{path}'")]
    LoaderMissing { path: PathBuf },

    /// The image to flash does not exist
    #[error("Image not found at '{path}'")]
    ImageMissing { path: PathBuf },

    /// A flashing-tool invocation failed
    #[error("Flash tool failed during {step}: {detail}")]
    ToolFailed { step: String, detail: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Build pipeline errors
///
/// Aggregates the stage errors that can escape `execute_build`. Acquisition
/// and injection mostly degrade in place, so what remains here is genuinely
/// fatal to the build.
#[derive(Error, Debug)]
pub enum BuildError {
    /// Acquisition error that had no safe fallback
    #[error(transparent)]
    Acquire(#[from] AcquireError),

    /// Injection error that had no safe fallback
    #[error(transparent)]
    Inject(#[from] InjectError),

    /// Configuration snapshot could not be read or written
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

impl BuildError {
    /// Shorthand for wrapping an IO failure with its path
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

impl AcquireError {
    /// Shorthand for wrapping an IO failure with its path
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        AcquireError::Io {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

impl InjectError {
    /// Shorthand for wrapping an IO failure with its path
    pub fn io(path: impl Into<PathBuf>, error: &std::io::Error) -> Self {
        InjectError::Io {
            path: path.into(),
            error: error.to_string(),
        }
    }
}

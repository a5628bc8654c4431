//! Default configuration values

use std::time::Duration;

/// Base URL of the OS image archive probed by the resolver
pub const ARCHIVE_BASE_URL: &str = "https://dl.armbian.com";

/// Suffix of compressed image files in archive directory listings
pub const IMAGE_SUFFIX: &str = ".img.xz";

/// Maximum redirect hops followed when probing the archive
pub const MAX_REDIRECT_HOPS: usize = 5;

/// Download progress granularity: report every 5 percent...
pub const PROGRESS_PERCENT_STEP: u64 = 5;

/// ...or every 10 MiB, whichever comes first
pub const PROGRESS_BYTE_STEP: u64 = 10 * 1024 * 1024;

/// Images larger than this are gzip-compressed before transfer
pub const COMPRESS_THRESHOLD_BYTES: u64 = 128 * 1024 * 1024;

/// Cooldown between unforced device-inventory probes
pub const DETECT_COOLDOWN: Duration = Duration::from_secs(5);

/// Settle time after pushing a bootloader, before the device re-enumerates
pub const LOADER_SETTLE: Duration = Duration::from_secs(3);

/// Timeout for inventory and storage-info queries
pub const QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for pushing the bootloader blob
pub const LOADER_TIMEOUT: Duration = Duration::from_secs(60);

/// Timeout for the raw image write (multi-gigabyte images take minutes)
pub const WRITE_TIMEOUT: Duration = Duration::from_secs(15 * 60);

/// Timeout for a full image download
pub const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Timeout for decompressing a full image with an external tool
pub const DECOMPRESS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Timeout for partition mapping, mounting, and related privileged calls
pub const MOUNT_TIMEOUT: Duration = Duration::from_secs(30);

/// Chunk size for compression and file shovel loops
pub const IO_CHUNK_SIZE: usize = 1024 * 1024;

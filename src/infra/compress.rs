//! Gzip compression for flash transfers
//!
//! Large images are gzip-compressed before transfer and decompressed to a
//! temporary file right before the raw write. Byte-granular progress lets the
//! flash engine map compression into its own progress window.

use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::config::defaults;

/// Progress callback: (bytes consumed from the source, total source bytes)
pub type CompressProgress<'a> = &'a (dyn Fn(u64, u64) + Send + Sync);

/// Gzip-compress `src` into `dst`, reporting per-chunk progress.
///
/// Returns the compressed size in bytes.
pub fn compress_gz(src: &Path, dst: &Path, progress: Option<CompressProgress>) -> io::Result<u64> {
    let total = std::fs::metadata(src)?.len();
    let input = std::fs::File::open(src)?;
    let mut reader = BufReader::with_capacity(defaults::IO_CHUNK_SIZE, input);

    let output = std::fs::File::create(dst)?;
    let mut encoder = GzEncoder::new(
        BufWriter::with_capacity(defaults::IO_CHUNK_SIZE, output),
        Compression::fast(),
    );

    let mut buffer = vec![0u8; defaults::IO_CHUNK_SIZE];
    let mut consumed: u64 = 0;

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        encoder.write_all(&buffer[..n])?;
        consumed += n as u64;
        if let Some(cb) = progress {
            cb(consumed, total);
        }
    }

    let writer = encoder.finish()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;

    Ok(std::fs::metadata(dst)?.len())
}

/// Decompress a gzip file into `dst`, returning the decompressed size.
pub fn decompress_gz(src: &Path, dst: &Path) -> io::Result<u64> {
    let input = std::fs::File::open(src)?;
    let mut decoder = GzDecoder::new(BufReader::with_capacity(defaults::IO_CHUNK_SIZE, input));

    let output = std::fs::File::create(dst)?;
    let mut writer = BufWriter::with_capacity(defaults::IO_CHUNK_SIZE, output);

    let mut buffer = vec![0u8; defaults::IO_CHUNK_SIZE];
    let mut written: u64 = 0;

    loop {
        let n = decoder.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        writer.write_all(&buffer[..n])?;
        written += n as u64;
    }

    writer.flush()?;
    Ok(written)
}

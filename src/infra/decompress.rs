//! Image decompression strategies
//!
//! Ordered fallback chain for unpacking `.img.xz` archives: the external `xz`
//! tool, the external `unxz` tool, then the in-process xz2 decoder. Each
//! strategy either finishes the job or reports itself not applicable, and the
//! chain only fails once every strategy has passed.

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use xz2::read::XzDecoder;

use crate::config::defaults;
use crate::error::AcquireError;
use crate::infra::runner::ToolRunner;

/// Outcome of one strategy attempt
#[derive(Debug)]
pub enum StrategyOutcome {
    /// The strategy produced the output file
    Done,
    /// The strategy cannot or could not handle this input; try the next one
    NotApplicable { reason: String },
}

/// One decompression strategy in the fallback chain
#[derive(Debug, Clone, Copy)]
pub enum Strategy {
    /// Shell out to an external decompressor (`xz`, `unxz`)
    ExternalTool(&'static str),
    /// Decode with the in-process xz2 reader
    InProcess,
}

impl Strategy {
    /// Human-readable name for logs
    pub fn name(&self) -> &'static str {
        match *self {
            Strategy::ExternalTool(tool) => tool,
            Strategy::InProcess => "xz2",
        }
    }

    async fn attempt<R: ToolRunner>(
        &self,
        runner: &R,
        src: &Path,
        dst: &Path,
    ) -> Result<StrategyOutcome, AcquireError> {
        match self {
            Strategy::ExternalTool(tool) => attempt_external(runner, tool, src, dst).await,
            Strategy::InProcess => attempt_in_process(src, dst),
        }
    }
}

/// The default strategy chain, in attempt order
pub fn strategy_chain() -> Vec<Strategy> {
    vec![
        Strategy::ExternalTool("xz"),
        Strategy::ExternalTool("unxz"),
        Strategy::InProcess,
    ]
}

/// Decompress `src` (an `.xz` file) to `dst`, trying each strategy in order.
pub async fn decompress_xz<R: ToolRunner>(
    runner: &R,
    src: &Path,
    dst: &Path,
) -> Result<(), AcquireError> {
    decompress_with_chain(runner, &strategy_chain(), src, dst).await
}

/// Chain driver, separated so tests can supply a custom chain.
pub async fn decompress_with_chain<R: ToolRunner>(
    runner: &R,
    chain: &[Strategy],
    src: &Path,
    dst: &Path,
) -> Result<(), AcquireError> {
    for strategy in chain {
        match strategy.attempt(runner, src, dst).await? {
            StrategyOutcome::Done => {
                tracing::debug!("decompressed {} via {}", src.display(), strategy.name());
                return Ok(());
            }
            StrategyOutcome::NotApplicable { reason } => {
                tracing::debug!("decompressor {} passed: {}", strategy.name(), reason);
            }
        }
    }

    Err(AcquireError::DecompressionUnavailable {
        path: src.to_path_buf(),
    })
}

/// Path the external tools produce: the source with `.xz` stripped
fn stripped_path(src: &Path) -> PathBuf {
    src.with_extension("")
}

async fn attempt_external<R: ToolRunner>(
    runner: &R,
    tool: &str,
    src: &Path,
    dst: &Path,
) -> Result<StrategyOutcome, AcquireError> {
    if which::which(tool).is_err() {
        return Ok(StrategyOutcome::NotApplicable {
            reason: format!("'{tool}' not in PATH"),
        });
    }

    let src_str = src.to_string_lossy();
    let args = ["--decompress", "--keep", "--force", src_str.as_ref()];
    let output = match runner.run(tool, &args, defaults::DECOMPRESS_TIMEOUT).await {
        Ok(output) => output,
        Err(e) => {
            return Ok(StrategyOutcome::NotApplicable {
                reason: e.to_string(),
            })
        }
    };

    if !output.success() {
        return Ok(StrategyOutcome::NotApplicable {
            reason: output.combined(),
        });
    }

    let produced = stripped_path(src);
    if produced != dst {
        std::fs::rename(&produced, dst).map_err(|e| AcquireError::io(&produced, &e))?;
    }
    Ok(StrategyOutcome::Done)
}

fn attempt_in_process(src: &Path, dst: &Path) -> Result<StrategyOutcome, AcquireError> {
    let input = match std::fs::File::open(src) {
        Ok(f) => f,
        Err(e) => {
            return Ok(StrategyOutcome::NotApplicable {
                reason: e.to_string(),
            })
        }
    };

    let mut decoder = XzDecoder::new(BufReader::with_capacity(defaults::IO_CHUNK_SIZE, input));
    let output = std::fs::File::create(dst).map_err(|e| AcquireError::io(dst, &e))?;
    let mut writer = BufWriter::with_capacity(defaults::IO_CHUNK_SIZE, output);
    let mut buffer = vec![0u8; defaults::IO_CHUNK_SIZE];

    loop {
        let n = match decoder.read(&mut buffer) {
            Ok(n) => n,
            Err(e) => {
                drop(writer);
                let _ = std::fs::remove_file(dst);
                return Ok(StrategyOutcome::NotApplicable {
                    reason: e.to_string(),
                });
            }
        };
        if n == 0 {
            break;
        }
        writer
            .write_all(&buffer[..n])
            .map_err(|e| AcquireError::io(dst, &e))?;
    }

    writer.flush().map_err(|e| AcquireError::io(dst, &e))?;
    Ok(StrategyOutcome::Done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::runner::{ToolError, ToolOutput};
    use std::time::Duration;
    use tempfile::TempDir;
    use xz2::write::XzEncoder;

    /// Runner whose every invocation fails to spawn, forcing the chain past
    /// the external strategies.
    struct NoToolsRunner;

    impl ToolRunner for NoToolsRunner {
        async fn run(
            &self,
            tool: &str,
            _args: &[&str],
            _timeout: Duration,
        ) -> Result<ToolOutput, ToolError> {
            Err(ToolError::Spawn {
                tool: tool.to_string(),
                error: "not installed".to_string(),
            })
        }
    }

    fn write_xz(path: &Path, data: &[u8]) {
        let file = std::fs::File::create(path).unwrap();
        let mut encoder = XzEncoder::new(file, 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap();
    }

    #[tokio::test]
    async fn test_in_process_strategy_decodes_xz() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("base.img.xz");
        let dst = temp.path().join("base.img");
        write_xz(&src, b"raw image contents");

        decompress_with_chain(&NoToolsRunner, &[Strategy::InProcess], &src, &dst)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"raw image contents");
    }

    #[tokio::test]
    async fn test_chain_falls_through_to_in_process() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("base.img.xz");
        let dst = temp.path().join("base.img");
        write_xz(&src, b"fallback payload");

        // External tools all fail to spawn; in-process should still win.
        decompress_with_chain(&NoToolsRunner, &strategy_chain(), &src, &dst)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&dst).unwrap(), b"fallback payload");
    }

    #[tokio::test]
    async fn test_exhausted_chain_is_decompression_unavailable() {
        let temp = TempDir::new().unwrap();
        let src = temp.path().join("garbage.img.xz");
        let dst = temp.path().join("garbage.img");
        std::fs::write(&src, b"this is not xz data").unwrap();

        let result = decompress_with_chain(&NoToolsRunner, &strategy_chain(), &src, &dst).await;

        assert!(matches!(
            result,
            Err(AcquireError::DecompressionUnavailable { .. })
        ));
        assert!(!dst.exists());
    }

    #[test]
    fn test_stripped_path_removes_xz_suffix() {
        assert_eq!(
            stripped_path(Path::new("/tmp/a/base.img.xz")),
            PathBuf::from("/tmp/a/base.img")
        );
    }
}

//! Build pipeline orchestration
//!
//! Coordinates the build stages: configuration snapshot, base-image
//! acquisition, script generation, injection, and artifact packaging.
//! Progress flows to the caller through an explicit callback; each stage is
//! also appended to the build log artifact.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::Settings;
use crate::core::acquire::{ImageAcquirer, StepProgress};
use crate::core::artifacts::{package_artifacts, BuildArtifact};
use crate::core::inject::ImageInjector;
use crate::core::model::BuildConfiguration;
use crate::core::resolver::ArchiveResolver;
use crate::core::scripts::ScriptSet;
use crate::error::BuildError;
use crate::infra::runner::ToolRunner;

/// The image build pipeline
pub struct BuildPipeline<R: ToolRunner> {
    settings: Settings,
    acquirer: ImageAcquirer<R>,
    injector: ImageInjector<R>,
}

impl<R: ToolRunner> BuildPipeline<R> {
    pub fn new(settings: Settings, runner: Arc<R>) -> Self {
        Self {
            acquirer: ImageAcquirer::new(settings.clone(), runner.clone()),
            injector: ImageInjector::new(runner),
            settings,
        }
    }

    /// Override the archive resolver (tests point it at a mock archive).
    pub fn with_resolver(mut self, resolver: ArchiveResolver) -> Self {
        self.acquirer = self.acquirer.with_resolver(resolver);
        self
    }

    /// Prepare the build working directory and snapshot the configuration.
    ///
    /// The snapshot is the build's source of truth from here on; later edits
    /// to the caller's configuration cannot affect a started build.
    pub fn generate_build_config(
        &self,
        config: &BuildConfiguration,
        build_id: &str,
    ) -> Result<PathBuf, BuildError> {
        let work_dir = self.settings.work_dir(build_id);
        std::fs::create_dir_all(&work_dir).map_err(|e| BuildError::io(&work_dir, &e))?;

        let snapshot = serde_json::to_string_pretty(config).map_err(|e| BuildError::Config {
            message: e.to_string(),
        })?;
        let snapshot_path = work_dir.join("config.json");
        std::fs::write(&snapshot_path, snapshot).map_err(|e| BuildError::io(&snapshot_path, &e))?;

        if !config.packages.install.is_empty() {
            let packages_path = work_dir.join("packages.txt");
            std::fs::write(&packages_path, config.packages.install.join("\n") + "\n")
                .map_err(|e| BuildError::io(&packages_path, &e))?;
        }

        Ok(work_dir)
    }

    /// Run the build stages against a prepared working directory.
    pub async fn execute_build(
        &self,
        work_dir: &Path,
        build_id: &str,
        progress: StepProgress<'_>,
    ) -> Result<Vec<BuildArtifact>, BuildError> {
        let config = load_snapshot(work_dir)?;
        let log = BuildLog::new(work_dir.join("build.log"));

        log.append(&format!(
            "build {build_id}: {} {} ({})",
            config.board.name,
            config.distribution.release,
            config.distribution.variant.label()
        ));

        // Acquisition occupies 0-60% of overall build progress.
        progress(0, "acquiring base image");
        let acquire_progress = |pct: u8, msg: &str| {
            progress((u16::from(pct) * 60 / 100) as u8, msg);
        };
        let acquired = self
            .acquirer
            .acquire(&config, build_id, &acquire_progress)
            .await?;
        log.append(&format!(
            "base image: {} ({:?})",
            acquired.path.display(),
            acquired.source
        ));

        progress(62, "rendering customization scripts");
        let scripts = ScriptSet::render(&config);
        log.append("customization scripts rendered");

        progress(65, "injecting customization");
        let outcome = self
            .injector
            .inject(&acquired.path, &scripts, work_dir)
            .await?;
        log.append(&format!(
            "injection: {:?}, configured={}",
            outcome.strategy, outcome.configured
        ));
        if let Some(package_dir) = &outcome.package_dir {
            log.append(&format!("deployment package: {}", package_dir.display()));
        }

        progress(90, "packaging artifacts");
        let artifacts = package_artifacts(work_dir, build_id, &outcome.image_path)?;
        log.append(&format!("{} artifacts packaged", artifacts.len()));

        progress(100, "build complete");
        Ok(artifacts)
    }
}

fn load_snapshot(work_dir: &Path) -> Result<BuildConfiguration, BuildError> {
    let snapshot_path = work_dir.join("config.json");
    let content =
        std::fs::read_to_string(&snapshot_path).map_err(|e| BuildError::io(&snapshot_path, &e))?;
    serde_json::from_str(&content).map_err(|e| BuildError::Config {
        message: e.to_string(),
    })
}

/// Append-only build log; logging failures never fail a build.
struct BuildLog {
    path: PathBuf,
}

impl BuildLog {
    fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn append(&self, line: &str) {
        let result = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .and_then(|mut file| writeln!(file, "{line}"));
        if let Err(e) = result {
            tracing::warn!("build log append failed: {e}");
        }
    }
}

//! CLI command implementation for `rockforge build`

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use crate::cli::output::{create_percent_bar, is_json, print_detail, print_success};
use crate::config::Settings;
use crate::core::builder::BuildPipeline;
use crate::core::model::BuildConfiguration;
use crate::flash::job::unix_millis;
use crate::infra::runner::{DemoRunner, SystemRunner, ToolRunner};

/// Execute the build command
pub async fn execute(config_path: &Path, build_id: Option<String>) -> Result<()> {
    let settings = Settings::from_env();

    let content = std::fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read configuration: {}", config_path.display()))?;
    let config = BuildConfiguration::from_toml(&content)
        .with_context(|| format!("Failed to parse configuration: {}", config_path.display()))?;

    let build_id = build_id.unwrap_or_else(|| format!("build-{}", unix_millis()));

    if settings.demo_mode {
        run_build(settings, Arc::new(DemoRunner::new()), &config, &build_id).await
    } else {
        run_build(settings, Arc::new(SystemRunner), &config, &build_id).await
    }
}

async fn run_build<R: ToolRunner>(
    settings: Settings,
    runner: Arc<R>,
    config: &BuildConfiguration,
    build_id: &str,
) -> Result<()> {
    let pipeline = BuildPipeline::new(settings, runner);
    let work_dir = pipeline
        .generate_build_config(config, build_id)
        .context("Failed to prepare build working directory")?;

    let bar = create_percent_bar("starting build");
    let bar_progress = bar.clone();
    let progress = move |pct: u8, msg: &str| {
        bar_progress.set_position(u64::from(pct));
        bar_progress.set_message(msg.to_string());
    };

    let artifacts = pipeline
        .execute_build(&work_dir, build_id, &progress)
        .await
        .context("Build failed")?;
    bar.finish_and_clear();

    if is_json() {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "build_id": build_id,
                "work_dir": work_dir,
                "artifacts": artifacts,
            }))
            .unwrap_or_default()
        );
        return Ok(());
    }

    print_success(&format!(
        "Build {build_id} complete: {} artifacts in {}",
        artifacts.len(),
        work_dir.display()
    ));
    for artifact in &artifacts {
        print_detail(&format!(
            "{:<9} {:>12}  {}",
            format!("{:?}", artifact.kind).to_lowercase(),
            format_size(artifact.size_bytes),
            artifact.name
        ));
    }

    Ok(())
}

fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{bytes} B")
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KiB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MiB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GiB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

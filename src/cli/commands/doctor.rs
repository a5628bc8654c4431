//! CLI command for `rockforge doctor`
//!
//! Checks system dependencies and reports issues with suggestions.

use anyhow::Result;
use serde::Serialize;

use crate::cli::output::{is_json, is_quiet, print_detail, print_info, status};
use crate::config::Settings;

/// One dependency or environment check
#[derive(Debug, Serialize)]
struct Check {
    name: &'static str,
    passed: bool,
    /// Required for flashing; optional tools only degrade features
    required: bool,
    detail: String,
    suggestion: Option<&'static str>,
}

fn tool_check(
    name: &'static str,
    binary: &str,
    required: bool,
    suggestion: &'static str,
) -> Check {
    match which::which(binary) {
        Ok(path) => Check {
            name,
            passed: true,
            required,
            detail: path.display().to_string(),
            suggestion: None,
        },
        Err(_) => Check {
            name,
            passed: false,
            required,
            detail: format!("'{binary}' not found in PATH"),
            suggestion: Some(suggestion),
        },
    }
}

fn run_checks(settings: &Settings) -> Vec<Check> {
    let mut checks = vec![
        tool_check(
            "flash tool",
            &settings.flash_tool,
            true,
            "Install rkdeveloptool (or set ROCKFORGE_FLASH_TOOL)",
        ),
        tool_check("xz", "xz", false, "Install xz-utils for faster decompression"),
        tool_check(
            "kpartx",
            "kpartx",
            false,
            "Install kpartx to enable in-image customization",
        ),
    ];

    checks.push(Check {
        name: "bootloader blob",
        passed: settings.loader_blob.is_file(),
        required: true,
        detail: settings.loader_blob.display().to_string(),
        suggestion: if settings.loader_blob.is_file() {
            None
        } else {
            Some("Download the loader for your SoC and set ROCKFORGE_LOADER")
        },
    });

    for (name, dir) in [
        ("build directory", &settings.build_dir),
        ("cache directory", &settings.cache_dir),
    ] {
        let passed = dir.is_dir() || std::fs::create_dir_all(dir).is_ok();
        checks.push(Check {
            name,
            passed,
            required: true,
            detail: dir.display().to_string(),
            suggestion: if passed {
                None
            } else {
                Some("Point ROCKFORGE_BUILD_DIR / ROCKFORGE_CACHE_DIR at a writable path")
            },
        });
    }

    checks
}

/// Execute the doctor command
pub async fn execute() -> Result<()> {
    let settings = Settings::from_env();
    let checks = run_checks(&settings);
    let failed_required: Vec<&Check> = checks.iter().filter(|c| c.required && !c.passed).collect();

    if is_json() {
        let report = serde_json::json!({
            "status": if failed_required.is_empty() { "success" } else { "error" },
            "demo_mode": settings.demo_mode,
            "checks": checks,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&report).unwrap_or_default()
        );
        if !failed_required.is_empty() {
            return Err(anyhow::anyhow!("Missing required dependencies"));
        }
        return Ok(());
    }

    if is_quiet() {
        if !failed_required.is_empty() {
            for check in &failed_required {
                eprintln!("{} Missing required: {}", status::ERROR, check.name);
            }
            return Err(anyhow::anyhow!("Missing required dependencies"));
        }
        return Ok(());
    }

    print_info("Checking environment...");
    println!();
    for check in &checks {
        let required_str = if check.required { "" } else { " [optional]" };
        if check.passed {
            println!(
                "  {} {}{required_str} - {}",
                status::SUCCESS,
                check.name,
                check.detail
            );
        } else {
            println!("  {} {}{required_str}", status::ERROR, check.name);
            print_detail(&check.detail);
            if let Some(suggestion) = check.suggestion {
                print_detail(&format!("Suggestion: {suggestion}"));
            }
        }
    }
    println!();

    if settings.demo_mode {
        print_info("Demo mode is ON: no network or hardware will be touched.");
    }

    if failed_required.is_empty() {
        print_info("Environment looks good.");
        Ok(())
    } else {
        Err(anyhow::anyhow!(
            "{} required check(s) failed",
            failed_required.len()
        ))
    }
}

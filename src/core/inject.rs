//! Image customization injection
//!
//! Two strategies, chosen by capability detection. With passwordless
//! privilege for the partition-mapping tool the scripts are injected into
//! the image itself (mapped, mounted, copied, armed with a one-shot unit).
//! Inside a container, or without that privilege, the same scripts ship as
//! an external deployment package next to the unmodified image. The package
//! path is a first-class outcome, not an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::defaults;
use crate::core::scripts::ScriptSet;
use crate::error::InjectError;
use crate::infra::runner::ToolRunner;

/// Name of the in-image directory holding the customization scripts
const SCRIPT_DIR_NAME: &str = "rockforge-firstboot";

/// In-image path the scripts are copied to
const SCRIPT_TARGET: &str = "opt/rockforge-firstboot";

/// One-shot systemd unit name
const UNIT_NAME: &str = "rockforge-firstboot.service";

/// How the customization was delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectStrategy {
    /// Scripts injected into the image's root partition
    InImage,
    /// Scripts emitted as a deployment package next to the image
    ExternalPackage,
}

/// Result of an injection
#[derive(Debug)]
pub struct InjectionOutcome {
    /// The image to flash (customized, plain-copied, or untouched)
    pub image_path: PathBuf,
    /// Strategy that was applied
    pub strategy: InjectStrategy,
    /// Deployment package directory (external-package strategy only)
    pub package_dir: Option<PathBuf>,
    /// False when the in-image strategy fell back to a plain copy
    pub configured: bool,
}

/// Injects customization scripts into or alongside a base image
pub struct ImageInjector<R: ToolRunner> {
    runner: Arc<R>,
}

impl<R: ToolRunner> ImageInjector<R> {
    pub fn new(runner: Arc<R>) -> Self {
        Self { runner }
    }

    /// Pick a strategy from the environment's capabilities.
    pub async fn detect_strategy(&self) -> InjectStrategy {
        if running_in_container() {
            tracing::info!("container detected, using external-package strategy");
            return InjectStrategy::ExternalPackage;
        }
        if !self.has_passwordless_mapping().await {
            let denied = InjectError::PrivilegeDenied {
                tool: "kpartx".to_string(),
            };
            tracing::info!("{denied}; using external-package strategy");
            return InjectStrategy::ExternalPackage;
        }
        InjectStrategy::InImage
    }

    /// Inject `scripts` for the image at `base_image`, auto-detecting the
    /// strategy.
    pub async fn inject(
        &self,
        base_image: &Path,
        scripts: &ScriptSet,
        work_dir: &Path,
    ) -> Result<InjectionOutcome, InjectError> {
        let strategy = self.detect_strategy().await;
        self.inject_with_strategy(strategy, base_image, scripts, work_dir)
            .await
    }

    /// Inject with a forced strategy (tests and `--package-only` use this).
    pub async fn inject_with_strategy(
        &self,
        strategy: InjectStrategy,
        base_image: &Path,
        scripts: &ScriptSet,
        work_dir: &Path,
    ) -> Result<InjectionOutcome, InjectError> {
        match strategy {
            InjectStrategy::ExternalPackage => {
                let package_dir = self.write_external_package(scripts, work_dir)?;
                Ok(InjectionOutcome {
                    image_path: base_image.to_path_buf(),
                    strategy,
                    package_dir: Some(package_dir),
                    configured: false,
                })
            }
            InjectStrategy::InImage => {
                let configured = configured_image_path(base_image, work_dir);
                std::fs::copy(base_image, &configured)
                    .map_err(|e| InjectError::io(&configured, &e))?;

                match self.inject_in_image(&configured, scripts, work_dir).await {
                    Ok(()) => Ok(InjectionOutcome {
                        image_path: configured,
                        strategy,
                        package_dir: None,
                        configured: true,
                    }),
                    Err(e) => {
                        // A partially-configured image is worse than an
                        // unconfigured one; re-copy and carry on.
                        tracing::warn!("in-image injection failed, keeping plain copy: {e}");
                        std::fs::copy(base_image, &configured)
                            .map_err(|e| InjectError::io(&configured, &e))?;
                        Ok(InjectionOutcome {
                            image_path: configured,
                            strategy,
                            package_dir: None,
                            configured: false,
                        })
                    }
                }
            }
        }
    }

    /// Map, mount, copy, arm, release. The mapping and mount are released
    /// on every exit path.
    async fn inject_in_image(
        &self,
        image: &Path,
        scripts: &ScriptSet,
        work_dir: &Path,
    ) -> Result<(), InjectError> {
        let root_device = self.map_partitions(image).await?;
        let mount_dir = work_dir.join("mnt");

        let result = self
            .configure_mounted(&root_device, &mount_dir, scripts, work_dir)
            .await;

        // Unmount and unmap unconditionally so no loop devices leak.
        self.release_mapping(image, &mount_dir).await;

        result
    }

    /// `kpartx -av` the image and return the root partition's mapper device.
    async fn map_partitions(&self, image: &Path) -> Result<String, InjectError> {
        let image_str = image.to_string_lossy();
        let output = self
            .runner
            .run(
                "sudo",
                &["-n", "kpartx", "-av", image_str.as_ref()],
                defaults::MOUNT_TIMEOUT,
            )
            .await
            .map_err(|e| InjectError::MappingFailed {
                image: image.to_path_buf(),
                error: e.to_string(),
            })?;

        if !output.success() {
            return Err(InjectError::MappingFailed {
                image: image.to_path_buf(),
                error: output.combined(),
            });
        }

        // "add map loop0p1 (253:0): 0 ..." - the root partition is the last
        // (and largest) one on these images.
        let root = output
            .stdout
            .lines()
            .filter(|line| line.trim_start().starts_with("add map"))
            .filter_map(|line| line.split_whitespace().nth(2))
            .last()
            .ok_or_else(|| InjectError::MappingFailed {
                image: image.to_path_buf(),
                error: "no partitions mapped".to_string(),
            })?;

        Ok(format!("/dev/mapper/{root}"))
    }

    async fn configure_mounted(
        &self,
        root_device: &str,
        mount_dir: &Path,
        scripts: &ScriptSet,
        work_dir: &Path,
    ) -> Result<(), InjectError> {
        std::fs::create_dir_all(mount_dir).map_err(|e| InjectError::io(mount_dir, &e))?;
        let mount_str = mount_dir.to_string_lossy();

        let output = self
            .runner
            .run(
                "sudo",
                &["-n", "mount", root_device, mount_str.as_ref()],
                defaults::MOUNT_TIMEOUT,
            )
            .await
            .map_err(|e| InjectError::MountFailed {
                device: root_device.to_string(),
                error: e.to_string(),
            })?;
        if !output.success() {
            return Err(InjectError::MountFailed {
                device: root_device.to_string(),
                error: output.combined(),
            });
        }

        // Stage scripts and unit locally, then copy into the image as root.
        let staging = work_dir.join(SCRIPT_DIR_NAME);
        write_script_files(&staging, scripts)?;
        std::fs::write(staging.join(UNIT_NAME), one_shot_unit()).map_err(|e| {
            InjectError::io(staging.join(UNIT_NAME), &e)
        })?;

        let staging_str = staging.to_string_lossy();
        let unit_staged = format!("{staging_str}/{UNIT_NAME}");
        let target = format!("{mount_str}/{SCRIPT_TARGET}");
        let unit_target = format!("{mount_str}/etc/systemd/system/{UNIT_NAME}");
        let wants_dir = format!("{mount_str}/etc/systemd/system/multi-user.target.wants");
        let wants_link = format!("{wants_dir}/{UNIT_NAME}");
        let unit_source = format!("../{UNIT_NAME}");

        let steps: [(&str, Vec<&str>); 4] = [
            (
                "copy scripts",
                vec!["-n", "cp", "-r", staging_str.as_ref(), &target],
            ),
            ("install unit", vec!["-n", "cp", &unit_staged, &unit_target]),
            ("create wants dir", vec!["-n", "mkdir", "-p", &wants_dir]),
            ("enable unit", vec!["-n", "ln", "-sf", &unit_source, &wants_link]),
        ];

        for (step, args) in &steps {
            let output = self
                .runner
                .run("sudo", args, defaults::MOUNT_TIMEOUT)
                .await
                .map_err(|e| InjectError::MountFailed {
                    device: root_device.to_string(),
                    error: format!("{step}: {e}"),
                })?;
            if !output.success() {
                return Err(InjectError::MountFailed {
                    device: root_device.to_string(),
                    error: format!("{step}: {}", output.combined()),
                });
            }
        }

        Ok(())
    }

    /// Best-effort unmount and unmap; failures are logged, never raised.
    async fn release_mapping(&self, image: &Path, mount_dir: &Path) {
        let mount_str = mount_dir.to_string_lossy();
        if let Err(e) = self
            .runner
            .run(
                "sudo",
                &["-n", "umount", mount_str.as_ref()],
                defaults::MOUNT_TIMEOUT,
            )
            .await
        {
            tracing::warn!("umount failed during release: {e}");
        }

        let image_str = image.to_string_lossy();
        if let Err(e) = self
            .runner
            .run(
                "sudo",
                &["-n", "kpartx", "-d", image_str.as_ref()],
                defaults::MOUNT_TIMEOUT,
            )
            .await
        {
            tracing::warn!("kpartx release failed: {e}");
        }
    }

    /// Scripts, unit file, and a deployment guide in a sibling directory.
    fn write_external_package(
        &self,
        scripts: &ScriptSet,
        work_dir: &Path,
    ) -> Result<PathBuf, InjectError> {
        let package_dir = work_dir.join("deploy-package");
        write_script_files(&package_dir, scripts)?;

        let unit_path = package_dir.join(UNIT_NAME);
        std::fs::write(&unit_path, one_shot_unit()).map_err(|e| InjectError::io(&unit_path, &e))?;

        let guide_path = package_dir.join("README.md");
        std::fs::write(&guide_path, deployment_guide())
            .map_err(|e| InjectError::io(&guide_path, &e))?;

        Ok(package_dir)
    }

    /// Passwordless sudo plus an installed kpartx.
    async fn has_passwordless_mapping(&self) -> bool {
        if which::which("kpartx").is_err() {
            return false;
        }
        self.runner
            .run("sudo", &["-n", "true"], defaults::QUERY_TIMEOUT)
            .await
            .map(|output| output.success())
            .unwrap_or(false)
    }
}

fn configured_image_path(base_image: &Path, work_dir: &Path) -> PathBuf {
    let stem = base_image
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    work_dir.join(format!("{stem}-configured.img"))
}

/// Write the non-empty script files into `dir`.
fn write_script_files(dir: &Path, scripts: &ScriptSet) -> Result<(), InjectError> {
    std::fs::create_dir_all(dir).map_err(|e| InjectError::io(dir, &e))?;
    for (name, content) in scripts.files() {
        if content.is_empty() {
            continue;
        }
        let path = dir.join(name);
        std::fs::write(&path, content).map_err(|e| InjectError::io(&path, &e))?;
    }
    Ok(())
}

/// Unit that runs the first-boot script once, then disarms itself.
fn one_shot_unit() -> String {
    format!(
        "[Unit]\n\
         Description=rockforge first-boot customization\n\
         ConditionPathExists=/{SCRIPT_TARGET}/firstboot.sh\n\
         After=network-online.target\n\
         \n\
         [Service]\n\
         Type=oneshot\n\
         ExecStart=/bin/sh /{SCRIPT_TARGET}/firstboot.sh\n\
         ExecStartPost=/bin/systemctl disable {UNIT_NAME}\n\
         ExecStartPost=/bin/rm -rf /{SCRIPT_TARGET}\n\
         \n\
         [Install]\n\
         WantedBy=multi-user.target\n"
    )
}

fn deployment_guide() -> String {
    format!(
        "# Deployment package\n\
         \n\
         This build could not modify the image directly (no privileged\n\
         mounting available), so the customization ships alongside it.\n\
         \n\
         To apply it on a running board:\n\
         \n\
         1. Copy this directory to the board:\n\
         `scp -r deploy-package root@<board>:/{SCRIPT_TARGET}`\n\
         2. Install the one-shot unit:\n\
         `cp /{SCRIPT_TARGET}/{UNIT_NAME} /etc/systemd/system/`\n\
         `systemctl enable {UNIT_NAME}`\n\
         3. Reboot. The unit runs the scripts once and removes itself.\n\
         \n\
         Alternatively run `sh /{SCRIPT_TARGET}/firstboot.sh` directly.\n"
    )
}

/// Container sandbox detection: marker files first, then the cgroup
/// signature of pid 1.
fn running_in_container() -> bool {
    if Path::new("/.dockerenv").exists() || Path::new("/run/.containerenv").exists() {
        return true;
    }
    std::fs::read_to_string("/proc/1/cgroup")
        .map(|cgroups| {
            ["docker", "containerd", "kubepods", "lxc"]
                .iter()
                .any(|marker| cgroups.contains(marker))
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::model::BuildConfiguration;
    use tempfile::TempDir;

    fn scripts() -> ScriptSet {
        let config = BuildConfiguration::from_toml(
            r#"
[board]
family = "rock5"
name = "rock-5b"
arch = "arm64"

[distribution]
release = "bookworm"

[system]
hostname = "edge-1"
"#,
        )
        .unwrap();
        ScriptSet::render(&config)
    }

    #[test]
    fn test_one_shot_unit_disarms_itself() {
        let unit = one_shot_unit();
        assert!(unit.contains("Type=oneshot"));
        assert!(unit.contains("systemctl disable rockforge-firstboot.service"));
        assert!(unit.contains("rm -rf /opt/rockforge-firstboot"));
    }

    #[test]
    fn test_configured_image_path_keeps_stem() {
        let path = configured_image_path(
            Path::new("/work/rock-5b_bookworm_minimal.img"),
            Path::new("/work"),
        );
        assert_eq!(
            path,
            PathBuf::from("/work/rock-5b_bookworm_minimal-configured.img")
        );
    }

    #[test]
    fn test_write_script_files_skips_empty_sections() {
        let temp = TempDir::new().unwrap();
        write_script_files(temp.path(), &scripts()).unwrap();

        assert!(temp.path().join("firstboot.sh").exists());
        assert!(temp.path().join("network-setup.sh").exists());
        // No user was configured, so no user-setup.sh.
        assert!(!temp.path().join("user-setup.sh").exists());
    }

    #[tokio::test]
    async fn test_external_package_contains_guide_unit_and_scripts() {
        use crate::infra::runner::SystemRunner;

        let temp = TempDir::new().unwrap();
        let base = temp.path().join("base.img");
        std::fs::write(&base, b"image bytes").unwrap();

        let injector = ImageInjector::new(Arc::new(SystemRunner));
        let outcome = injector
            .inject_with_strategy(
                InjectStrategy::ExternalPackage,
                &base,
                &scripts(),
                temp.path(),
            )
            .await
            .unwrap();

        // Image is untouched and the package sits next to it.
        assert_eq!(outcome.image_path, base);
        assert_eq!(std::fs::read(&base).unwrap(), b"image bytes");
        let package_dir = outcome.package_dir.unwrap();
        assert!(package_dir.join("README.md").exists());
        assert!(package_dir.join(UNIT_NAME).exists());
        assert!(package_dir.join("firstboot.sh").exists());
    }
}

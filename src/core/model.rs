//! Build configuration model
//!
//! The declarative description of one board build. A deep snapshot (via
//! `Clone` + the JSON snapshot artifact) is taken when a build starts; the
//! configuration is never mutated afterwards.

use serde::{Deserialize, Serialize};

/// Which flavor of image to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImageVariant {
    /// Server/headless image
    #[default]
    Minimal,
    /// Image with a desktop environment
    Desktop,
}

impl ImageVariant {
    /// Label used in cache keys and artifact names
    pub fn label(&self) -> &'static str {
        match self {
            ImageVariant::Minimal => "minimal",
            ImageVariant::Desktop => "desktop",
        }
    }
}

/// Board identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSelection {
    /// Board family (e.g. "rock5")
    pub family: String,
    /// Board name as the archive spells it (e.g. "rock-5b")
    pub name: String,
    /// CPU architecture (e.g. "arm64")
    pub arch: String,
}

/// Distribution selection
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DistributionSelection {
    /// Release name (e.g. "bookworm")
    pub release: String,
    /// Minimal or desktop image
    #[serde(default)]
    pub variant: ImageVariant,
    /// Specific desktop environment substring to match (e.g. "gnome")
    #[serde(default)]
    pub desktop: Option<String>,
}

/// Wi-Fi credentials injected on first boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WifiConfig {
    pub ssid: String,
    pub password: String,
}

/// Hostname and network options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SystemOptions {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub wifi: Option<WifiConfig>,
}

/// First-boot user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserConfig {
    pub name: String,
    pub password: String,
    /// Grant passwordless sudo
    #[serde(default)]
    pub sudo: bool,
}

/// SSH hardening options
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SshOptions {
    #[serde(default)]
    pub disable_password_auth: bool,
    #[serde(default)]
    pub disable_root_login: bool,
    #[serde(default)]
    pub port: Option<u16>,
}

/// Packages to add or remove on first boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PackageSelection {
    #[serde(default)]
    pub install: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

/// Declarative description of one board build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildConfiguration {
    pub board: BoardSelection,
    pub distribution: DistributionSelection,
    #[serde(default)]
    pub system: SystemOptions,
    #[serde(default)]
    pub user: Option<UserConfig>,
    #[serde(default)]
    pub ssh: SshOptions,
    #[serde(default)]
    pub packages: PackageSelection,
    /// Extra shell lines appended to the first-boot script
    #[serde(default)]
    pub custom_script: Vec<String>,
}

impl BuildConfiguration {
    /// Parse a configuration from its TOML representation
    pub fn from_toml(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Canonical cache filename for the base image this configuration needs.
    ///
    /// Only board, release, and variant participate: customization never
    /// touches the cached base image.
    pub fn cache_key(&self) -> String {
        let variant = match (&self.distribution.variant, &self.distribution.desktop) {
            (ImageVariant::Desktop, Some(desktop)) => desktop.clone(),
            (variant, _) => variant.label().to_string(),
        };
        format!(
            "{}_{}_{}.img",
            self.board.name, self.distribution.release, variant
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL_TOML: &str = r#"
[board]
family = "rock5"
name = "rock-5b"
arch = "arm64"

[distribution]
release = "bookworm"
variant = "minimal"
"#;

    const FULL_TOML: &str = r#"
[board]
family = "rock5"
name = "rock-5b"
arch = "arm64"

[distribution]
release = "bookworm"
variant = "desktop"
desktop = "gnome"

[system]
hostname = "shopfloor-1"

[system.wifi]
ssid = "factory"
password = "secret"

[user]
name = "operator"
password = "hunter2"
sudo = true

[ssh]
disable_password_auth = true
port = 2222

[packages]
install = ["htop", "iotop"]
remove = ["snapd"]

custom_script = ["echo done"]
"#;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let config = BuildConfiguration::from_toml(MINIMAL_TOML).unwrap();
        assert_eq!(config.board.name, "rock-5b");
        assert_eq!(config.distribution.variant, ImageVariant::Minimal);
        assert!(config.user.is_none());
        assert!(config.packages.install.is_empty());
        assert!(config.custom_script.is_empty());
    }

    #[test]
    fn test_full_config_parses() {
        let config = BuildConfiguration::from_toml(FULL_TOML).unwrap();
        assert_eq!(config.distribution.desktop.as_deref(), Some("gnome"));
        assert_eq!(config.system.wifi.as_ref().unwrap().ssid, "factory");
        assert!(config.user.as_ref().unwrap().sudo);
        assert_eq!(config.ssh.port, Some(2222));
        assert_eq!(config.packages.install.len(), 2);
    }

    #[test]
    fn test_cache_key_uses_board_release_variant() {
        let config = BuildConfiguration::from_toml(MINIMAL_TOML).unwrap();
        assert_eq!(config.cache_key(), "rock-5b_bookworm_minimal.img");
    }

    #[test]
    fn test_cache_key_prefers_desktop_environment() {
        let config = BuildConfiguration::from_toml(FULL_TOML).unwrap();
        assert_eq!(config.cache_key(), "rock-5b_bookworm_gnome.img");
    }

    #[test]
    fn test_cache_key_ignores_customization() {
        let mut a = BuildConfiguration::from_toml(FULL_TOML).unwrap();
        let b = a.clone();
        a.system.hostname = Some("renamed".to_string());
        a.packages.install.push("vim".to_string());
        assert_eq!(a.cache_key(), b.cache_key());
    }

    #[test]
    fn test_snapshot_round_trips_through_json() {
        let config = BuildConfiguration::from_toml(FULL_TOML).unwrap();
        let json = serde_json::to_string(&config).unwrap();
        let back: BuildConfiguration = serde_json::from_str(&json).unwrap();
        assert_eq!(config, back);
    }
}

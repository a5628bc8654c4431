//! Build artifact packaging
//!
//! Assembles the final list of named, typed, sized outputs of a build.
//! Artifacts are never mutated after creation; callers retrieve them by
//! stable name + path, with the content type derived from the kind.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::BuildError;
use crate::infra::download::file_sha256;

/// What an artifact is, and therefore how it should be served
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    Image,
    Log,
    Config,
    Checksum,
    Packages,
}

impl ArtifactKind {
    /// Content type for byte-stream retrieval
    pub fn content_type(&self) -> &'static str {
        match self {
            ArtifactKind::Image => "application/octet-stream",
            ArtifactKind::Config => "application/json",
            ArtifactKind::Log | ArtifactKind::Checksum | ArtifactKind::Packages => "text/plain",
        }
    }
}

/// One immutable build output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildArtifact {
    /// File name, unique within the build
    pub name: String,
    pub kind: ArtifactKind,
    pub size_bytes: u64,
    /// Absolute path on disk
    pub path: PathBuf,
    /// Stable retrieval locator: `<build id>/<name>`
    pub locator: String,
}

impl BuildArtifact {
    fn from_file(path: &Path, kind: ArtifactKind, build_id: &str) -> Result<Self, BuildError> {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| BuildError::Config {
                message: format!("artifact path '{}' has no file name", path.display()),
            })?;
        let size_bytes = std::fs::metadata(path)
            .map_err(|e| BuildError::io(path, &e))?
            .len();
        Ok(Self {
            locator: format!("{build_id}/{name}"),
            name,
            kind,
            size_bytes,
            path: path.to_path_buf(),
        })
    }
}

/// Collect the build's outputs, writing the image checksum artifact on the
/// way.
pub fn package_artifacts(
    work_dir: &Path,
    build_id: &str,
    image_path: &Path,
) -> Result<Vec<BuildArtifact>, BuildError> {
    let mut artifacts = Vec::new();

    artifacts.push(BuildArtifact::from_file(
        image_path,
        ArtifactKind::Image,
        build_id,
    )?);

    let digest = file_sha256(image_path)?;
    let image_name = image_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let checksum_path = work_dir.join(format!("{image_name}.sha256"));
    std::fs::write(&checksum_path, format!("{digest}  {image_name}\n"))
        .map_err(|e| BuildError::io(&checksum_path, &e))?;
    artifacts.push(BuildArtifact::from_file(
        &checksum_path,
        ArtifactKind::Checksum,
        build_id,
    )?);

    for (name, kind) in [
        ("build.log", ArtifactKind::Log),
        ("config.json", ArtifactKind::Config),
        ("packages.txt", ArtifactKind::Packages),
    ] {
        let path = work_dir.join(name);
        if path.is_file() {
            artifacts.push(BuildArtifact::from_file(&path, kind, build_id)?);
        }
    }

    Ok(artifacts)
}

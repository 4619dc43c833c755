//! Artifact naming conventions.
//!
//! Artifacts live in the cache directory under a fixed prefix plus the
//! derived key, so the prune sweep can find them by name alone and the
//! serving layer can locate a file from nothing but the key.

use std::path::{Path, PathBuf};

/// Fixed file-name prefix for every cached artifact.
pub const ARTIFACT_PREFIX: &str = "img_cache_";

/// Output encoding class for an artifact.
///
/// PNG sources keep their format; everything else is converted to JPEG.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Png,
    Jpeg,
}

impl ArtifactKind {
    /// Classify a source URL by the extension of its path component.
    pub fn from_url(url: &str) -> Self {
        let path = url.split(['?', '#']).next().unwrap_or(url);
        match path.rsplit('.').next() {
            Some(ext) if ext.eq_ignore_ascii_case("png") => ArtifactKind::Png,
            _ => ArtifactKind::Jpeg,
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Png => "png",
            ArtifactKind::Jpeg => "jpg",
        }
    }
}

/// Deterministic on-disk location of the artifact for a key.
pub fn artifact_path(cache_dir: &Path, key: &str, kind: ArtifactKind) -> PathBuf {
    cache_dir.join(format!("{ARTIFACT_PREFIX}{key}.{}", kind.extension()))
}

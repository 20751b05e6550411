//! Sidecar metadata written next to every model artifact.
//!
//! The artifact itself only holds weights, so the class order and input
//! resolution a model was trained with travel in `<stem>.manifest.json`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use shared::{LungClass, ModelKind};
use std::path::{Path, PathBuf};

use crate::preprocess::IMAGE_SIZE;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to access manifest {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Malformed manifest {}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("Manifest describes a {found} model, expected {expected}")]
    ModelKind { expected: ModelKind, found: ModelKind },
    #[error("{model} was trained with class order {found:?}, expected {expected:?}")]
    ClassOrder {
        model: ModelKind,
        expected: Vec<String>,
        found: Vec<String>,
    },
    #[error("{model} was trained at {found}px, expected {expected}px")]
    ImageSize {
        model: ModelKind,
        expected: u32,
        found: u32,
    },
    #[error("{model} artifact {} has no manifest", artifact.display())]
    Missing { model: ModelKind, artifact: PathBuf },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelManifest {
    pub model: ModelKind,
    /// Class display names in output index order.
    pub classes: Vec<String>,
    pub image_size: u32,
    pub epochs: usize,
    pub trained_at: DateTime<Utc>,
}

impl ModelManifest {
    pub fn new(model: ModelKind, classes: &[LungClass], epochs: usize) -> Self {
        Self {
            model,
            classes: classes.iter().map(|c| c.name().to_string()).collect(),
            image_size: IMAGE_SIZE,
            epochs,
            trained_at: Utc::now(),
        }
    }

    /// `models/cnn_model.ot` -> `models/cnn_model.manifest.json`
    pub fn path_for(artifact: &Path) -> PathBuf {
        artifact.with_extension("manifest.json")
    }

    pub fn write(&self, artifact: &Path) -> Result<PathBuf, ManifestError> {
        let path = Self::path_for(artifact);
        let json = serde_json::to_string_pretty(self).map_err(|source| ManifestError::Json {
            path: path.clone(),
            source,
        })?;
        std::fs::write(&path, json).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        Ok(path)
    }

    /// Reads the manifest for `artifact`, `None` if there is none.
    pub fn read(artifact: &Path) -> Result<Option<Self>, ManifestError> {
        let path = Self::path_for(artifact);
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ManifestError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|source| ManifestError::Json { path, source })
    }

    pub fn verify(&self, model: ModelKind, classes: &[LungClass]) -> Result<(), ManifestError> {
        if self.model != model {
            return Err(ManifestError::ModelKind {
                expected: model,
                found: self.model,
            });
        }

        let expected: Vec<String> = classes.iter().map(|c| c.name().to_string()).collect();
        if self.classes != expected {
            return Err(ManifestError::ClassOrder {
                model,
                expected,
                found: self.classes.clone(),
            });
        }

        if self.image_size != IMAGE_SIZE {
            return Err(ManifestError::ImageSize {
                model,
                expected: IMAGE_SIZE,
                found: self.image_size,
            });
        }
        Ok(())
    }
}

/// Checks the manifest next to `artifact` against the served class order.
///
/// A missing manifest is only an error when `strict` is set.
pub fn check_artifact(
    artifact: &Path,
    model: ModelKind,
    classes: &[LungClass],
    strict: bool,
) -> Result<(), ManifestError> {
    match ModelManifest::read(artifact)? {
        Some(manifest) => manifest.verify(model, classes),
        None if strict => Err(ManifestError::Missing {
            model,
            artifact: artifact.to_path_buf(),
        }),
        None => {
            log::warn!(
                "No manifest for {} artifact {}, assuming class order {:?}",
                model.label(),
                artifact.display(),
                classes.iter().map(|c| c.name()).collect::<Vec<_>>()
            );
            Ok(())
        }
    }
}

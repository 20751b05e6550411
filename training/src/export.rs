use anyhow::Context;
use lungscan::models::manifest::ModelManifest;
use shared::{LungClass, ModelKind};
use std::path::{Path, PathBuf};
use tch::nn::VarStore;

/// Writes the weights in `vs` to `path` and the manifest beside them.
///
/// Returns the manifest path.
pub fn save_artifact(vs: &VarStore, path: &Path, kind: ModelKind, epochs: usize) -> anyhow::Result<PathBuf> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    vs.save(path)
        .with_context(|| format!("Failed to save {} weights to {}", kind.label(), path.display()))?;
    let manifest = ModelManifest::new(kind, &LungClass::all(), epochs).write(path)?;

    log::info!(
        "Saved {} model to {} (manifest {})",
        kind.label(),
        path.display(),
        manifest.display()
    );
    Ok(manifest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use lungscan::models::manifest::check_artifact;
    use lungscan::models::{SdaeNet, TorchClassifier, init_network};
    use tch::Device;

    #[test]
    fn saved_artifact_loads_in_the_server() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("sdae_classifier.ot");
        let (vs, _net) = init_network::<SdaeNet>(Device::Cpu, 4);

        let manifest = save_artifact(&vs, &path, ModelKind::Sdae, 3).unwrap();
        assert_eq!(manifest, dir.path().join("models").join("sdae_classifier.manifest.json"));

        TorchClassifier::<SdaeNet>::load(&path, 4, Device::Cpu).unwrap();
        check_artifact(&path, ModelKind::Sdae, &LungClass::all(), true).unwrap();
        assert_eq!(ModelManifest::read(&path).unwrap().unwrap().epochs, 3);
    }
}

use shared::{ClassPrediction, LungClass, ModelKind, ReceivedCounts};
use std::path::Path;

use crate::config::ModelsConfig;
use crate::ensemble::{EnsembleAggregator, EnsembleError, ModelOutputs};
use crate::models::manifest::check_artifact;
use crate::models::{
    CnnNet, Classifier, DbnNet, InferenceError, ModelLoadError, Network, SdaeNet, TorchClassifier,
};
use crate::preprocess::{PreprocessError, preprocess_image};
use crate::uploads::UploadError;

#[derive(Debug, thiserror::Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Upload(#[from] UploadError),
    #[error(transparent)]
    Preprocess(#[from] PreprocessError),
    #[error(transparent)]
    Inference(#[from] InferenceError),
    #[error(transparent)]
    Ensemble(#[from] EnsembleError),
    #[error("Analysis worker failed: {0}")]
    Worker(String),
}

/// A failed analysis together with whatever the models produced before it.
#[derive(Debug)]
pub struct AnalysisFailure {
    pub error: AnalysisError,
    pub received: ReceivedCounts,
}

impl AnalysisFailure {
    pub fn new(error: impl Into<AnalysisError>) -> Self {
        Self {
            error: error.into(),
            received: ReceivedCounts::default(),
        }
    }
}

/// The loaded ensemble, shared read-only by every request.
pub struct AnalysisService {
    cnn: Box<dyn Classifier>,
    dbn: Box<dyn Classifier>,
    sdae: Box<dyn Classifier>,
    aggregator: EnsembleAggregator,
}

impl AnalysisService {
    pub fn new(
        cnn: Box<dyn Classifier>,
        dbn: Box<dyn Classifier>,
        sdae: Box<dyn Classifier>,
        aggregator: EnsembleAggregator,
    ) -> Self {
        Self {
            cnn,
            dbn,
            sdae,
            aggregator,
        }
    }

    /// Loads all three artifacts; any failure is fatal for start-up.
    pub fn load(config: &ModelsConfig) -> Result<Self, ModelLoadError> {
        let classes = LungClass::all();
        let device = config.device.resolve();
        log::info!("Loading models on {:?}", device);

        Ok(Self::new(
            load_member::<CnnNet>(&config.cnn, &classes, config, device)?,
            load_member::<DbnNet>(&config.dbn, &classes, config, device)?,
            load_member::<SdaeNet>(&config.sdae, &classes, config, device)?,
            EnsembleAggregator::new(classes),
        ))
    }

    pub fn expected_classes(&self) -> usize {
        self.aggregator.expected_classes()
    }

    /// Runs the stored upload at `path` through every member and averages
    /// the results.
    pub fn analyze_file(&self, path: &Path) -> Result<Vec<ClassPrediction>, AnalysisFailure> {
        let image = preprocess_image(path).map_err(AnalysisFailure::new)?;
        log::debug!("Shapes - {}", image.shapes());

        let mut received = ReceivedCounts::default();
        let mut outputs = ModelOutputs::default();
        for (member, slot) in [
            (&self.cnn, &mut outputs.cnn),
            (&self.dbn, &mut outputs.dbn),
            (&self.sdae, &mut outputs.sdae),
        ] {
            match member.predict_proba(&image) {
                Ok(probabilities) => {
                    received.record(member.kind(), probabilities.len());
                    *slot = probabilities;
                }
                Err(e) => {
                    return Err(AnalysisFailure {
                        error: e.into(),
                        received,
                    });
                }
            }
        }

        let predictions = self
            .aggregator
            .aggregate(&outputs)
            .map_err(|e| AnalysisFailure {
                error: e.into(),
                received,
            })?;

        log::info!("Successful analysis of {}:", path.display());
        for prediction in &predictions {
            log::info!(" - {}: {:.2}%", prediction.name, prediction.probability * 100.0);
        }
        Ok(predictions)
    }

    pub fn member_kinds(&self) -> [ModelKind; 3] {
        [self.cnn.kind(), self.dbn.kind(), self.sdae.kind()]
    }
}

fn load_member<N: Network + 'static>(
    path: &Path,
    classes: &[LungClass],
    config: &ModelsConfig,
    device: tch::Device,
) -> Result<Box<dyn Classifier>, ModelLoadError> {
    let classifier = TorchClassifier::<N>::load(path, classes.len() as i64, device)?;
    check_artifact(path, N::KIND, classes, config.strict_manifests)?;
    Ok(Box::new(classifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    /// Returns a fixed vector regardless of input.
    struct FixedClassifier {
        kind: ModelKind,
        output: Vec<f64>,
    }

    impl Classifier for FixedClassifier {
        fn kind(&self) -> ModelKind {
            self.kind
        }

        fn predict_proba(&self, _image: &crate::preprocess::PreprocessedImage) -> Result<Vec<f64>, InferenceError> {
            Ok(self.output.clone())
        }
    }

    struct FailingClassifier(ModelKind);

    impl Classifier for FailingClassifier {
        fn kind(&self) -> ModelKind {
            self.0
        }

        fn predict_proba(&self, _image: &crate::preprocess::PreprocessedImage) -> Result<Vec<f64>, InferenceError> {
            Err(InferenceError::InputShape {
                model: self.0,
                expected: 49152,
                actual: 12,
            })
        }
    }

    fn fixed(kind: ModelKind, output: &[f64]) -> Box<dyn Classifier> {
        Box::new(FixedClassifier {
            kind,
            output: output.to_vec(),
        })
    }

    fn scan_on_disk(dir: &Path) -> std::path::PathBuf {
        let path = dir.join("scan.png");
        DynamicImage::ImageRgb8(RgbImage::from_pixel(64, 48, Rgb([90, 90, 90])))
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[test]
    fn averages_all_members() {
        let dir = tempfile::tempdir().unwrap();
        let service = AnalysisService::new(
            fixed(ModelKind::Cnn, &[1.0, 0.0, 0.0, 0.0]),
            fixed(ModelKind::Dbn, &[0.0, 1.0, 0.0, 0.0]),
            fixed(ModelKind::Sdae, &[0.0, 0.0, 0.5, 0.5]),
            EnsembleAggregator::default(),
        );

        let predictions = service.analyze_file(&scan_on_disk(dir.path())).unwrap();
        let probabilities: Vec<f64> = predictions.iter().map(|p| p.probability).collect();
        let expected = [1.0 / 3.0, 1.0 / 3.0, 0.5 / 3.0, 0.5 / 3.0];
        for (got, want) in probabilities.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9);
        }
    }

    #[test]
    fn mismatch_keeps_every_count() {
        let dir = tempfile::tempdir().unwrap();
        let service = AnalysisService::new(
            fixed(ModelKind::Cnn, &[0.25; 4]),
            fixed(ModelKind::Dbn, &[0.5, 0.5]),
            fixed(ModelKind::Sdae, &[0.2; 5]),
            EnsembleAggregator::default(),
        );

        let failure = service.analyze_file(&scan_on_disk(dir.path())).unwrap_err();
        assert!(matches!(failure.error, AnalysisError::Ensemble(_)));
        assert_eq!(failure.received, ReceivedCounts { cnn: 4, dbn: 2, sdae: 5 });
    }

    #[test]
    fn failing_member_leaves_later_counts_at_zero() {
        let dir = tempfile::tempdir().unwrap();
        let service = AnalysisService::new(
            fixed(ModelKind::Cnn, &[0.25; 4]),
            Box::new(FailingClassifier(ModelKind::Dbn)),
            fixed(ModelKind::Sdae, &[0.25; 4]),
            EnsembleAggregator::default(),
        );

        let failure = service.analyze_file(&scan_on_disk(dir.path())).unwrap_err();
        assert!(matches!(failure.error, AnalysisError::Inference(_)));
        assert_eq!(failure.received, ReceivedCounts { cnn: 4, dbn: 0, sdae: 0 });
    }

    #[test]
    fn undecodable_upload_fails_before_prediction() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.jpg");
        std::fs::write(&path, b"\x00\x01\x02").unwrap();
        let service = AnalysisService::new(
            fixed(ModelKind::Cnn, &[0.25; 4]),
            fixed(ModelKind::Dbn, &[0.25; 4]),
            fixed(ModelKind::Sdae, &[0.25; 4]),
            EnsembleAggregator::default(),
        );

        let failure = service.analyze_file(&path).unwrap_err();
        assert!(matches!(failure.error, AnalysisError::Preprocess(_)));
        assert_eq!(failure.received, ReceivedCounts::default());
    }

    #[test]
    fn missing_artifact_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let config = ModelsConfig {
            cnn: dir.path().join("cnn_model.ot"),
            dbn: dir.path().join("dbn_pipeline_model.ot"),
            sdae: dir.path().join("sdae_classifier.ot"),
            ..ModelsConfig::default()
        };

        assert!(matches!(
            AnalysisService::load(&config),
            Err(ModelLoadError::Missing { model: ModelKind::Cnn, .. })
        ));
    }
}

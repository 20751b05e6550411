pub mod cnn;
pub mod dbn;
pub mod manifest;
pub mod sdae;

use shared::ModelKind;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tch::nn::{self, ModuleT};
use tch::{Device, Kind, TchError, Tensor};

use crate::preprocess::PreprocessedImage;

pub use cnn::CnnNet;
pub use dbn::DbnNet;
pub use sdae::SdaeNet;

#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("{model} input has {actual} values, expected {expected}")]
    InputShape {
        model: ModelKind,
        expected: usize,
        actual: usize,
    },
    #[error("{model} inference failed: {source}")]
    Torch {
        model: ModelKind,
        #[source]
        source: TchError,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum ModelLoadError {
    #[error("{model} artifact not found at {}", path.display())]
    Missing { model: ModelKind, path: PathBuf },
    #[error("{model} artifact {} could not be loaded: {source}", path.display())]
    Torch {
        model: ModelKind,
        path: PathBuf,
        #[source]
        source: TchError,
    },
    #[error(transparent)]
    Manifest(#[from] manifest::ManifestError),
}

/// Anything that scores a preprocessed image over the fixed class set.
pub trait Classifier: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Ordered per-class probabilities for `image`.
    fn predict_proba(&self, image: &PreprocessedImage) -> Result<Vec<f64>, InferenceError>;
}

/// A libtorch network that can serve as one ensemble member.
///
/// The same definition is used by the trainers and by [`TorchClassifier`], so
/// weights written by one are always readable by the other.
pub trait Network: ModuleT + Sized {
    const KIND: ModelKind;
    /// Element type the weights and inputs are held in.
    const PRECISION: Kind;
    /// Number of values one input sample must contain.
    const INPUT_LEN: usize;

    fn build(p: &nn::Path, num_classes: i64) -> Self;

    /// Converts the layout this network consumes into a batched tensor.
    fn input_tensor(image: &PreprocessedImage) -> Tensor;
}

/// Creates a fresh store and network with the store already converted to the
/// network's precision.
pub fn init_network<N: Network>(device: Device, num_classes: i64) -> (nn::VarStore, N) {
    let mut vs = nn::VarStore::new(device);
    let net = N::build(&vs.root(), num_classes);
    if N::PRECISION == Kind::Double {
        vs.double();
    }
    (vs, net)
}

/// Serves one network behind the [`Classifier`] capability.
pub struct TorchClassifier<N: Network> {
    vs: nn::VarStore,
    net: Mutex<N>,
}

impl<N: Network> TorchClassifier<N> {
    pub fn new(vs: nn::VarStore, net: N) -> Self {
        Self {
            vs,
            net: Mutex::new(net),
        }
    }

    pub fn load(path: &Path, num_classes: i64, device: Device) -> Result<Self, ModelLoadError> {
        if !path.is_file() {
            return Err(ModelLoadError::Missing {
                model: N::KIND,
                path: path.to_path_buf(),
            });
        }

        let (mut vs, net) = init_network::<N>(device, num_classes);
        vs.load(path).map_err(|source| ModelLoadError::Torch {
            model: N::KIND,
            path: path.to_path_buf(),
            source,
        })?;
        vs.freeze();

        log::info!("Loaded {} model from {}", N::KIND.label(), path.display());
        Ok(Self::new(vs, net))
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

impl<N: Network> Classifier for TorchClassifier<N> {
    fn kind(&self) -> ModelKind {
        N::KIND
    }

    fn predict_proba(&self, image: &PreprocessedImage) -> Result<Vec<f64>, InferenceError> {
        let input = N::input_tensor(image);
        let actual = input.numel();
        if actual != N::INPUT_LEN {
            return Err(InferenceError::InputShape {
                model: N::KIND,
                expected: N::INPUT_LEN,
                actual,
            });
        }

        let torch_err = |source: TchError| InferenceError::Torch {
            model: N::KIND,
            source,
        };
        let input = input.f_to_device(self.vs.device()).map_err(torch_err)?;

        // a panicking forward leaves the weights untouched
        let net = self.net.lock().unwrap_or_else(PoisonError::into_inner);
        let logits = tch::no_grad(|| net.forward_t(&input, false));
        let probabilities = logits
            .f_softmax(-1, Kind::Double)
            .and_then(|p| p.f_view([-1]))
            .map_err(torch_err)?;

        Vec::<f64>::try_from(&probabilities).map_err(torch_err)
    }
}

/// Collects `values` into a tensor of the given shape.
pub fn tensor_from<T: tch::kind::Element + Copy>(
    values: impl Iterator<Item = T>,
    shape: &[usize],
) -> Tensor {
    let data: Vec<T> = values.collect();
    let dims: Vec<i64> = shape.iter().map(|&d| d as i64).collect();
    Tensor::from_slice(&data).view(dims.as_slice())
}

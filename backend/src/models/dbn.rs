use shared::ModelKind;
use tch::nn::{self, ModuleT};
use tch::{Kind, Tensor};

use super::{Network, tensor_from};
use crate::preprocess::{FLAT_LEN, PreprocessedImage};

pub const RBM_COMPONENTS: i64 = 256;
pub const MLP_HIDDEN: i64 = 128;

/// Bernoulli restricted Boltzmann machine over flattened pixels.
///
/// Parameters are plain tensors rather than layers: the trainer updates them
/// in place with contrastive divergence instead of backpropagation.
#[derive(Debug)]
pub struct Rbm {
    /// `[components, visible]`
    pub weight: Tensor,
    pub hidden_bias: Tensor,
    pub visible_bias: Tensor,
}

impl Rbm {
    pub fn new(p: &nn::Path, n_visible: i64, n_components: i64) -> Self {
        Self {
            weight: p.var(
                "weight",
                &[n_components, n_visible],
                nn::Init::Randn {
                    mean: 0.0,
                    stdev: 0.01,
                },
            ),
            hidden_bias: p.zeros("hidden_bias", &[n_components]),
            visible_bias: p.zeros("visible_bias", &[n_visible]),
        }
    }

    /// `P(h = 1 | v)`
    pub fn mean_hiddens(&self, visible: &Tensor) -> Tensor {
        (visible.matmul(&self.weight.tr()) + &self.hidden_bias).sigmoid()
    }

    /// `P(v = 1 | h)`
    pub fn mean_visibles(&self, hidden: &Tensor) -> Tensor {
        (hidden.matmul(&self.weight) + &self.visible_bias).sigmoid()
    }

    /// Latent representation fed to the classifier.
    pub fn transform(&self, visible: &Tensor) -> Tensor {
        self.mean_hiddens(visible)
    }
}

/// RBM feature extractor followed by a one-hidden-layer perceptron.
#[derive(Debug)]
pub struct DbnNet {
    pub rbm: Rbm,
    hidden: nn::Linear,
    output: nn::Linear,
}

impl DbnNet {
    /// Logits for already transformed RBM features.
    pub fn classify_features(&self, features: &Tensor) -> Tensor {
        features.apply(&self.hidden).relu().apply(&self.output)
    }

    /// Weight matrices of the perceptron stage, biases excluded.
    pub fn mlp_weights(&self) -> Vec<Tensor> {
        vec![self.hidden.ws.shallow_clone(), self.output.ws.shallow_clone()]
    }
}

impl Network for DbnNet {
    const KIND: ModelKind = ModelKind::Dbn;
    const PRECISION: Kind = Kind::Double;
    const INPUT_LEN: usize = FLAT_LEN;

    fn build(p: &nn::Path, num_classes: i64) -> Self {
        Self {
            rbm: Rbm::new(&(p / "rbm"), FLAT_LEN as i64, RBM_COMPONENTS),
            hidden: nn::linear(p / "mlp" / "hidden", RBM_COMPONENTS, MLP_HIDDEN, Default::default()),
            output: nn::linear(p / "mlp" / "output", MLP_HIDDEN, num_classes, Default::default()),
        }
    }

    fn input_tensor(image: &PreprocessedImage) -> Tensor {
        tensor_from(image.dbn.iter().copied(), image.dbn.shape())
    }
}

impl ModuleT for DbnNet {
    fn forward_t(&self, xs: &Tensor, _train: bool) -> Tensor {
        self.classify_features(&self.rbm.transform(xs))
    }
}

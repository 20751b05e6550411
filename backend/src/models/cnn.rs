use shared::ModelKind;
use tch::nn::{self, ModuleT};
use tch::{Kind, Tensor};

use super::{Network, tensor_from};
use crate::preprocess::{FLAT_LEN, PreprocessedImage};

// 128 -> conv 126 -> pool 63 -> conv 61 -> pool 30
const FLATTENED: i64 = 64 * 30 * 30;

/// Two conv/pool stages followed by a dense head.
#[derive(Debug)]
pub struct CnnNet {
    conv1: nn::Conv2D,
    conv2: nn::Conv2D,
    fc1: nn::Linear,
    fc2: nn::Linear,
}

impl Network for CnnNet {
    const KIND: ModelKind = ModelKind::Cnn;
    const PRECISION: Kind = Kind::Float;
    const INPUT_LEN: usize = FLAT_LEN;

    fn build(p: &nn::Path, num_classes: i64) -> Self {
        Self {
            conv1: nn::conv2d(p / "conv1", 3, 32, 3, Default::default()),
            conv2: nn::conv2d(p / "conv2", 32, 64, 3, Default::default()),
            fc1: nn::linear(p / "fc1", FLATTENED, 128, Default::default()),
            fc2: nn::linear(p / "fc2", 128, num_classes, Default::default()),
        }
    }

    fn input_tensor(image: &PreprocessedImage) -> Tensor {
        tensor_from(image.cnn.iter().copied(), image.cnn.shape())
    }
}

impl ModuleT for CnnNet {
    /// Takes `[batch, height, width, channel]` pixels and returns logits.
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        xs.permute([0, 3, 1, 2])
            .apply(&self.conv1)
            .relu()
            .max_pool2d_default(2)
            .apply(&self.conv2)
            .relu()
            .max_pool2d_default(2)
            .flat_view()
            .apply(&self.fc1)
            .relu()
            .dropout(0.5, train)
            .apply(&self.fc2)
    }
}

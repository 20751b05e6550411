use shared::ModelKind;
use tch::nn::{self, ModuleT};
use tch::{Kind, Tensor};

use super::{Network, tensor_from};
use crate::preprocess::{FLAT_LEN, PreprocessedImage};

const ENCODER_WIDTHS: [i64; 3] = [512, 256, 128];
const DROPOUT: f64 = 0.2;

/// Encoder stack of an autoencoder with a softmax head, used as a plain
/// classifier over flattened pixels.
#[derive(Debug)]
pub struct SdaeNet {
    encoder: Vec<nn::Linear>,
    head: nn::Linear,
}

impl Network for SdaeNet {
    const KIND: ModelKind = ModelKind::Sdae;
    const PRECISION: Kind = Kind::Float;
    const INPUT_LEN: usize = FLAT_LEN;

    fn build(p: &nn::Path, num_classes: i64) -> Self {
        let mut encoder = Vec::with_capacity(ENCODER_WIDTHS.len());
        let mut width = FLAT_LEN as i64;
        for (i, &next) in ENCODER_WIDTHS.iter().enumerate() {
            encoder.push(nn::linear(p / format!("encoder{}", i), width, next, Default::default()));
            width = next;
        }

        Self {
            encoder,
            head: nn::linear(p / "head", width, num_classes, Default::default()),
        }
    }

    fn input_tensor(image: &PreprocessedImage) -> Tensor {
        tensor_from(image.sdae.iter().copied(), image.sdae.shape())
    }
}

impl ModuleT for SdaeNet {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        let last = self.encoder.len() - 1;
        let encoded = self.encoder.iter().enumerate().fold(xs.shallow_clone(), |acc, (i, layer)| {
            let activated = acc.apply(layer).relu();
            // no dropout after the bottleneck
            if i < last { activated.dropout(DROPOUT, train) } else { activated }
        });
        encoded.apply(&self.head)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::testing::{assert_distribution, gradient_image};
    use crate::models::{Classifier, CnnNet, ModelLoadError, TorchClassifier, init_network};
    use tch::Device;

    #[test]
    fn encoder_narrows_to_bottleneck() {
        let (vs, net) = init_network::<SdaeNet>(Device::Cpu, 4);

        let widths: Vec<i64> = net.encoder.iter().map(|l| l.ws.size()[0]).collect();
        assert_eq!(widths, vec![512, 256, 128]);
        assert_eq!(vs.variables().len(), 8);
    }

    #[test]
    fn batch_forward_shape() {
        let (_vs, net) = init_network::<SdaeNet>(Device::Cpu, 4);
        let xs = Tensor::rand([5, FLAT_LEN as i64], (Kind::Float, Device::Cpu));

        assert_eq!(net.forward_t(&xs, true).size(), vec![5, 4]);
    }

    #[test]
    fn classifier_returns_a_distribution() {
        let (vs, net) = init_network::<SdaeNet>(Device::Cpu, 4);
        let classifier = TorchClassifier::new(vs, net);

        assert_distribution(&classifier.predict_proba(&gradient_image()).unwrap());
    }

    #[test]
    fn weights_of_another_architecture_fail_to_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sdae_classifier.ot");
        let (vs, _net) = init_network::<SdaeNet>(Device::Cpu, 4);
        vs.save(&path).unwrap();

        assert!(matches!(
            TorchClassifier::<CnnNet>::load(&path, 4, Device::Cpu),
            Err(ModelLoadError::Torch { model: ModelKind::Cnn, .. })
        ));
    }
}

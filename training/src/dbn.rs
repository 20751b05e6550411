//! Two-stage fitting of the deep belief network member.
//!
//! The RBM is fitted unsupervised with persistent contrastive divergence,
//! then the perceptron is fitted on its hidden activations while the RBM
//! stays fixed.

use lungscan::models::DbnNet;
use lungscan::models::dbn::Rbm;
use rand::Rng;
use rand::seq::SliceRandom;
use tch::nn::{self, OptimizerConfig};
use tch::{Kind, Tensor};

use crate::eval::{EpochStats, Progress};

#[derive(Debug, Clone, Copy)]
pub struct RbmTrainer {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub epochs: usize,
}

impl Default for RbmTrainer {
    fn default() -> Self {
        Self {
            learning_rate: 0.06,
            batch_size: 10,
            epochs: 10,
        }
    }
}

impl RbmTrainer {
    /// Fits `rbm` to the rows of `data` in place and returns the mean squared
    /// reconstruction error after each epoch.
    ///
    /// Batches are taken in order. The negative phase starts from a
    /// persistent chain of `batch_size` hidden samples that carries over
    /// between batches and epochs.
    pub fn fit(&self, rbm: &mut Rbm, data: &Tensor) -> Vec<f64> {
        let rows = data.size()[0];
        let components = rbm.weight.size()[0];
        let batch_size = self.batch_size.max(1) as i64;
        let mut chain = Tensor::zeros([batch_size, components], (data.kind(), data.device()));
        let mut errors = Vec::with_capacity(self.epochs);

        tch::no_grad(|| {
            for epoch in 1..=self.epochs {
                let mut start = 0;
                while start < rows {
                    let len = batch_size.min(rows - start);
                    let positive = data.narrow(0, start, len);
                    chain = self.step(rbm, &positive, &chain);
                    start += len;
                }

                let error = reconstruction_error(rbm, data);
                log::info!("[RBM] Epoch {}/{}, reconstruction error = {:.5}", epoch, self.epochs, error);
                errors.push(error);
            }
        });
        errors
    }

    /// One PCD update; returns the advanced chain.
    fn step(&self, rbm: &mut Rbm, positive: &Tensor, chain: &Tensor) -> Tensor {
        let hidden_positive = rbm.mean_hiddens(positive);
        let negative = rbm.mean_visibles(chain).bernoulli();
        let hidden_negative = rbm.mean_hiddens(&negative);

        let lr = self.learning_rate / positive.size()[0] as f64;
        let weight_update =
            hidden_positive.tr().matmul(positive) - hidden_negative.tr().matmul(&negative);
        let hidden_update = column_sums(&hidden_positive) - column_sums(&hidden_negative);
        let visible_update = column_sums(positive) - column_sums(&negative);

        rbm.weight += weight_update * lr;
        rbm.hidden_bias += hidden_update * lr;
        rbm.visible_bias += visible_update * lr;

        hidden_negative.bernoulli()
    }
}

fn column_sums(xs: &Tensor) -> Tensor {
    xs.sum_dim_intlist([0i64].as_slice(), false, xs.kind())
}

pub fn reconstruction_error(rbm: &Rbm, data: &Tensor) -> f64 {
    tch::no_grad(|| {
        let reconstructed = rbm.mean_visibles(&rbm.mean_hiddens(data));
        (reconstructed - data).square().mean(Kind::Double).double_value(&[])
    })
}

/// How far perceptron fitting got.
#[derive(Debug, Clone, Copy, Default)]
pub struct MlpReport {
    pub epochs: usize,
    pub last: EpochStats,
}

#[derive(Debug, Clone, Copy)]
pub struct MlpTrainer {
    pub learning_rate: f64,
    /// L2 penalty on the perceptron weights.
    pub alpha: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Epochs without an improvement larger than `tolerance` before stopping.
    pub patience: usize,
    pub tolerance: f64,
}

impl Default for MlpTrainer {
    fn default() -> Self {
        Self {
            learning_rate: 1e-3,
            alpha: 1e-4,
            batch_size: 200,
            max_epochs: 100,
            patience: 10,
            tolerance: 1e-4,
        }
    }
}

impl MlpTrainer {
    /// Fits the perceptron stage of `net` on fixed RBM `features`.
    ///
    /// Only the perceptron receives gradients; the RBM parameters are left
    /// as they are.
    pub fn fit(
        &self,
        vs: &nn::VarStore,
        net: &DbnNet,
        features: &Tensor,
        labels: &Tensor,
        rng: &mut impl Rng,
    ) -> anyhow::Result<MlpReport> {
        let rows = features.size()[0] as usize;
        let batch_size = self.batch_size.clamp(1, rows.max(1));
        let mut optimizer = nn::Adam::default().build(vs, self.learning_rate)?;

        let mut best_loss = f64::INFINITY;
        let mut stale_epochs = 0;
        let mut report = MlpReport::default();
        let mut order: Vec<i64> = (0..rows as i64).collect();

        for epoch in 1..=self.max_epochs {
            order.shuffle(rng);
            let mut progress = Progress::default();

            for chunk in order.chunks(batch_size) {
                let index = Tensor::from_slice(chunk).to_device(features.device());
                let xs = features.index_select(0, &index);
                let ys = labels.index_select(0, &index);

                let logits = net.classify_features(&xs);
                let loss = logits.cross_entropy_for_logits(&ys) + self.penalty(net, chunk.len());
                optimizer.backward_step(&loss);
                progress.record(&logits, &ys, &loss);
            }

            let last = progress.stats();
            report = MlpReport { epochs: epoch, last };
            log::info!(
                "[MLP] Epoch {}/{}, loss = {:.6}, accuracy = {:.4}",
                epoch,
                self.max_epochs,
                last.loss,
                last.accuracy
            );

            if last.loss > best_loss - self.tolerance {
                stale_epochs += 1;
            } else {
                stale_epochs = 0;
            }
            best_loss = best_loss.min(last.loss);

            if stale_epochs >= self.patience {
                log::info!(
                    "[MLP] Loss did not improve more than {} for {} epochs, stopping",
                    self.tolerance,
                    self.patience
                );
                break;
            }
        }
        Ok(report)
    }

    fn penalty(&self, net: &DbnNet, batch_len: usize) -> Tensor {
        let mut squared = Tensor::from(0.0f64);
        for weight in net.mlp_weights() {
            squared = weight.square().sum(Kind::Double) + squared.to_device(weight.device());
        }
        squared * (0.5 * self.alpha / batch_len as f64)
    }
}

/// Share of rows in `features` the perceptron assigns to the right class.
pub fn accuracy(net: &DbnNet, features: &Tensor, labels: &Tensor) -> f64 {
    tch::no_grad(|| {
        net.classify_features(features)
            .argmax(-1, false)
            .eq_tensor(labels)
            .to_kind(Kind::Double)
            .mean(Kind::Double)
            .double_value(&[])
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lungscan::models::init_network;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use tch::Device;

    fn small_rbm(vs: &mut nn::VarStore) -> Rbm {
        let rbm = Rbm::new(&vs.root(), 6, 3);
        vs.double();
        rbm
    }

    #[test]
    fn rbm_learns_visible_statistics() {
        tch::manual_seed(42);
        let mut vs = nn::VarStore::new(Device::Cpu);
        let mut rbm = small_rbm(&mut vs);
        let data = Tensor::from_slice(&[1.0f64, 1.0, 1.0, 0.0, 0.0, 0.0])
            .view([1, 6])
            .repeat([8, 1]);

        let trainer = RbmTrainer {
            learning_rate: 0.1,
            batch_size: 4,
            epochs: 30,
        };
        let errors = trainer.fit(&mut rbm, &data);

        assert_eq!(errors.len(), 30);
        assert!(errors[29] < errors[0]);
        assert!(errors[29] < 0.2);
        assert_eq!(rbm.weight.size(), vec![3, 6]);
    }

    #[test]
    fn rbm_accepts_a_short_final_batch() {
        tch::manual_seed(1);
        let mut vs = nn::VarStore::new(Device::Cpu);
        let mut rbm = small_rbm(&mut vs);
        let data = Tensor::rand([7, 6], (Kind::Double, Device::Cpu)).round();

        let trainer = RbmTrainer {
            batch_size: 3,
            epochs: 2,
            ..RbmTrainer::default()
        };
        assert_eq!(trainer.fit(&mut rbm, &data).len(), 2);
    }

    /// Forty rows whose active block of features names the class.
    fn block_features() -> (Tensor, Tensor) {
        let mut values = vec![0.0f64; 40 * 256];
        let mut labels = Vec::with_capacity(40);
        for row in 0..40 {
            let label = row % 4;
            for column in label * 64..(label + 1) * 64 {
                values[row * 256 + column] = 1.0;
            }
            labels.push(label as i64);
        }
        (
            Tensor::from_slice(&values).view([40, 256]),
            Tensor::from_slice(&labels),
        )
    }

    #[test]
    fn mlp_fits_separable_features() {
        tch::manual_seed(42);
        let (vs, net) = init_network::<DbnNet>(Device::Cpu, 4);
        let (features, labels) = block_features();

        let trainer = MlpTrainer {
            learning_rate: 1e-2,
            max_epochs: 60,
            patience: 60,
            ..MlpTrainer::default()
        };
        let mut rng = StdRng::seed_from_u64(42);
        let report = trainer.fit(&vs, &net, &features, &labels, &mut rng).unwrap();

        assert!(report.last.loss.is_finite());
        assert!(accuracy(&net, &features, &labels) > 0.9);
    }

    #[test]
    fn mlp_stops_when_loss_stalls() {
        let (vs, net) = init_network::<DbnNet>(Device::Cpu, 4);
        let features = Tensor::zeros([8, 256], (Kind::Double, Device::Cpu));
        let labels = Tensor::from_slice(&[0i64, 1, 2, 3, 0, 1, 2, 3]);

        let trainer = MlpTrainer {
            learning_rate: 0.0,
            max_epochs: 100,
            patience: 3,
            ..MlpTrainer::default()
        };
        let mut rng = StdRng::seed_from_u64(0);
        let report = trainer.fit(&vs, &net, &features, &labels, &mut rng).unwrap();
        assert_eq!(report.epochs, 4);
        assert!(report.last.loss > 0.0);
    }
}

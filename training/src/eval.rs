use tch::Tensor;

/// Loss and accuracy over one pass of a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EpochStats {
    pub loss: f64,
    pub accuracy: f64,
}

/// Accumulates sample-weighted loss and correct predictions across batches.
#[derive(Debug, Default)]
pub struct Progress {
    samples: usize,
    loss_sum: f64,
    correct: usize,
}

impl Progress {
    /// `loss` is the batch mean, `logits` is `[n, classes]`.
    pub fn record(&mut self, logits: &Tensor, labels: &Tensor, loss: &Tensor) {
        let n = labels.size()[0] as usize;
        self.samples += n;
        self.loss_sum += loss.double_value(&[]) * n as f64;
        self.correct += logits
            .argmax(-1, false)
            .eq_tensor(labels)
            .sum(tch::Kind::Int64)
            .int64_value(&[]) as usize;
    }

    pub fn samples(&self) -> usize {
        self.samples
    }

    pub fn stats(&self) -> EpochStats {
        if self.samples == 0 {
            return EpochStats::default();
        }
        EpochStats {
            loss: self.loss_sum / self.samples as f64,
            accuracy: self.correct as f64 / self.samples as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_loss_by_batch_size() {
        let mut progress = Progress::default();
        let logits = Tensor::from_slice(&[2.0f32, 0.0, 0.0, 3.0]).view([2, 2]);
        progress.record(&logits, &Tensor::from_slice(&[0i64, 0]), &Tensor::from(1.0f64));

        let logits = Tensor::from_slice(&[0.0f32, 1.0]).view([1, 2]);
        progress.record(&logits, &Tensor::from_slice(&[1i64]), &Tensor::from(4.0f64));

        let stats = progress.stats();
        assert_eq!(progress.samples(), 3);
        assert!((stats.loss - 2.0).abs() < 1e-12);
        assert!((stats.accuracy - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_progress_is_zero() {
        assert_eq!(Progress::default().stats(), EpochStats::default());
    }
}

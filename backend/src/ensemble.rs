//! Score aggregation for the three-model ensemble

use shared::{ClassPrediction, LungClass};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EnsembleError {
    #[error("Model outputs mismatch - Expected {expected}, Got CNN: {cnn}, DBN: {dbn}, SDAE: {sdae}")]
    ClassCountMismatch {
        expected: usize,
        cnn: usize,
        dbn: usize,
        sdae: usize,
    },
}

/// Per-class probabilities from each ensemble member.
#[derive(Debug, Clone, Default)]
pub struct ModelOutputs {
    pub cnn: Vec<f64>,
    pub dbn: Vec<f64>,
    pub sdae: Vec<f64>,
}

/// Averages the members' probability vectors class by class.
pub struct EnsembleAggregator {
    classes: Vec<LungClass>,
}

impl EnsembleAggregator {
    pub fn new(classes: Vec<LungClass>) -> Self {
        Self { classes }
    }

    pub fn expected_classes(&self) -> usize {
        self.classes.len()
    }

    /// Unweighted mean of the three vectors, in class index order.
    ///
    /// Only lengths are checked; the members are assumed to share index
    /// semantics, which the model manifests guard at load time.
    pub fn aggregate(&self, outputs: &ModelOutputs) -> Result<Vec<ClassPrediction>, EnsembleError> {
        let expected = self.expected_classes();
        if [&outputs.cnn, &outputs.dbn, &outputs.sdae]
            .iter()
            .any(|v| v.len() != expected)
        {
            return Err(EnsembleError::ClassCountMismatch {
                expected,
                cnn: outputs.cnn.len(),
                dbn: outputs.dbn.len(),
                sdae: outputs.sdae.len(),
            });
        }

        Ok(self
            .classes
            .iter()
            .enumerate()
            .map(|(i, class)| ClassPrediction {
                id: class.slug(),
                name: class.name().to_string(),
                probability: (outputs.cnn[i] + outputs.dbn[i] + outputs.sdae[i]) / 3.0,
                color: String::new(),
            })
            .collect())
    }
}

impl Default for EnsembleAggregator {
    fn default() -> Self {
        Self::new(LungClass::all())
    }
}

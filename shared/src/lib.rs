use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, IntoStaticStr};

/// Number of tissue categories every model must score.
pub const CLASS_COUNT: usize = 4;

/// Lung tissue categories in model output order.
///
/// The declaration order is the index order of every probability vector the
/// models produce, so it must never be reordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, IntoStaticStr)]
pub enum LungClass {
    #[strum(serialize = "Squamous Cell Carcinoma")]
    SquamousCellCarcinoma,
    #[strum(serialize = "Large Cell Carcinoma")]
    LargeCellCarcinoma,
    #[strum(serialize = "Adenocarcinoma")]
    Adenocarcinoma,
    #[strum(serialize = "Normal")]
    Normal,
}

impl LungClass {
    pub fn all() -> Vec<LungClass> {
        LungClass::iter().collect()
    }

    pub fn name(&self) -> &'static str {
        (*self).into()
    }

    pub fn slug(&self) -> String {
        slugify(self.name())
    }

    pub fn index(&self) -> usize {
        LungClass::iter()
            .position(|class| class == *self)
            .unwrap_or_default()
    }

    /// Resolves a dataset directory name such as
    /// `large.cell.carcinoma_left.hilum_T2_N2_M0_IIIa` to its class.
    pub fn from_label(label: &str) -> Option<LungClass> {
        let normalized: String = label
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == '.' || c == '_' || c.is_whitespace() { '-' } else { c })
            .collect();

        LungClass::iter().find(|class| {
            let slug = class.slug();
            normalized == slug || normalized.starts_with(&format!("{}-", slug))
        })
    }
}

/// URL-safe identifier for a class display name.
pub fn slugify(name: &str) -> String {
    name.to_lowercase().replace(' ', "-")
}

/// The three ensemble members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumIter, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ModelKind {
    Cnn,
    Dbn,
    Sdae,
}

impl ModelKind {
    pub fn label(&self) -> &'static str {
        match self {
            ModelKind::Cnn => "CNN",
            ModelKind::Dbn => "DBN",
            ModelKind::Sdae => "SDAE",
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ClassPrediction {
    pub id: String,
    pub name: String,
    pub probability: f64,
    pub color: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalyzeResponse {
    pub predictions: Vec<ClassPrediction>,
    pub processed_image_url: String,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

/// Number of probabilities each model returned before the request failed.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceivedCounts {
    pub cnn: usize,
    pub dbn: usize,
    pub sdae: usize,
}

impl ReceivedCounts {
    pub fn record(&mut self, model: ModelKind, len: usize) {
        match model {
            ModelKind::Cnn => self.cnn = len,
            ModelKind::Dbn => self.dbn = len,
            ModelKind::Sdae => self.sdae = len,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct AnalysisFailureResponse {
    pub error: String,
    pub details: String,
    pub expected_classes: usize,
    pub received: ReceivedCounts,
}

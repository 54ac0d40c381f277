//! Layer Detectors

use crate::bayes::{GaussianNb, TrainingSet};
use crate::config::SvmConfig;
use crate::features::AttackCategory;
use crate::svm::SvmClassifier;
use crate::{DlhaError, Result};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Layer name used in errors and logs
pub const LAYER1: &str = "layer-1";
/// Layer name used in errors and logs
pub const LAYER2: &str = "layer-2";

/// A layer's persisted state: fitted parameters or an explicit unfit marker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", content = "model", rename_all = "snake_case")]
pub enum LayerState<M> {
    /// Training subset was empty
    Unfit,
    /// Fitted parameters
    Fitted(M),
}

impl<M> LayerState<M> {
    /// Whether parameters are present
    pub fn is_fitted(&self) -> bool {
        matches!(self, LayerState::Fitted(_))
    }

    fn model(&self, layer: &'static str) -> Result<&M> {
        match self {
            LayerState::Fitted(model) => Ok(model),
            LayerState::Unfit => Err(DlhaError::UnfitModel(layer)),
        }
    }
}

/// Per-class probabilities from one layer, in class order
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    classes: Vec<AttackCategory>,
    values: Vec<f64>,
}

impl ClassProbabilities {
    /// Pair classes with their probabilities
    pub fn new(classes: Vec<AttackCategory>, values: Vec<f64>) -> Result<Self> {
        if classes.len() != values.len() || classes.is_empty() {
            return Err(DlhaError::Numerical(format!(
                "{} probabilities for {} classes",
                values.len(),
                classes.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(DlhaError::Numerical("non-finite class probability".into()));
        }
        Ok(Self { classes, values })
    }

    /// Classes in order
    pub fn classes(&self) -> &[AttackCategory] {
        &self.classes
    }

    /// Probabilities in class order
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Largest probability
    pub fn max(&self) -> f64 {
        self.values.iter().copied().fold(f64::NEG_INFINITY, f64::max)
    }

    /// Probability of `category`, zero if the layer does not know it
    pub fn get(&self, category: AttackCategory) -> f64 {
        self.classes
            .iter()
            .position(|c| *c == category)
            .map_or(0.0, |i| self.values[i])
    }

    /// Most probable class; ties go to the earlier class
    pub fn argmax_first(&self) -> AttackCategory {
        let mut best = 0;
        for (i, v) in self.values.iter().enumerate() {
            if *v > self.values[best] {
                best = i;
            }
        }
        self.classes[best]
    }

    /// Most probable class; ties go to the later class
    pub fn argmax_last(&self) -> AttackCategory {
        let mut best = 0;
        for (i, v) in self.values.iter().enumerate() {
            if *v >= self.values[best] {
                best = i;
            }
        }
        self.classes[best]
    }
}

/// Rows of `x` whose label is one of `classes`, or `None` if there are none
fn subset(x: &Array2<f64>, labels: &[AttackCategory], classes: &[AttackCategory]) -> Option<TrainingSet> {
    let rows: Vec<usize> = (0..labels.len())
        .filter(|&i| classes.contains(&labels[i]))
        .collect();
    if rows.is_empty() {
        return None;
    }
    let targets: Array1<AttackCategory> = rows.iter().map(|&i| labels[i]).collect();
    Some(DatasetBase::new(x.select(Axis(0), &rows), targets))
}

fn check_labels(x: &Array2<f64>, labels: &[AttackCategory]) -> Result<()> {
    if x.nrows() != labels.len() {
        return Err(DlhaError::ShapeMismatch {
            expected: x.nrows(),
            actual: labels.len(),
        });
    }
    Ok(())
}

/// Layer-1: Gaussian naive Bayes over DoS and Probe
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CoarseDetector {
    state: LayerState<GaussianNb>,
}

impl CoarseDetector {
    /// Categories this layer is trained on
    pub const CLASSES: [AttackCategory; 2] = [AttackCategory::DoS, AttackCategory::Probe];

    /// Fit on the DoS/Probe rows of the reduced training matrix
    pub fn fit(x: &Array2<f64>, labels: &[AttackCategory]) -> Result<Self> {
        check_labels(x, labels)?;
        let state = match subset(x, labels, &Self::CLASSES) {
            Some(dataset) => {
                tracing::info!("Fitting {} on {} records", LAYER1, dataset.records().nrows());
                let model = GaussianNb::fit(&dataset)?;
                if model.classes() != Self::CLASSES {
                    tracing::warn!(
                        "{} saw only {:?}, every record will be Unknown",
                        LAYER1,
                        model.classes()
                    );
                }
                LayerState::Fitted(model)
            }
            None => {
                tracing::info!("No DoS/Probe records, {} left unfit", LAYER1);
                LayerState::Unfit
            }
        };
        Ok(Self { state })
    }

    /// Detector with no parameters
    pub fn unfit() -> Self {
        Self { state: LayerState::Unfit }
    }

    /// Persisted state
    pub fn state(&self) -> &LayerState<GaussianNb> {
        &self.state
    }

    /// Whether parameters are present
    pub fn is_fitted(&self) -> bool {
        self.state.is_fitted()
    }

    /// Class probabilities for one reduced row.
    ///
    /// A model that did not see both DoS and Probe cannot score.
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> Result<ClassProbabilities> {
        let model = self.state.model(LAYER1)?;
        if model.classes() != Self::CLASSES {
            return Err(DlhaError::UnfitModel(LAYER1));
        }
        ClassProbabilities::new(model.classes().to_vec(), model.predict_proba(row)?)
    }

    /// Structural checks against the reduced width
    pub fn validate(&self, width: usize) -> Result<()> {
        if let LayerState::Fitted(model) = &self.state {
            model.validate()?;
            if model.n_features() != width {
                return Err(DlhaError::CorruptBundle(format!(
                    "{} expects width {}, reducer produces {}",
                    LAYER1,
                    model.n_features(),
                    width
                )));
            }
        }
        Ok(())
    }
}

/// Layer-2: calibrated RBF SVM over Normal, R2L and U2R
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FineDetector {
    state: LayerState<SvmClassifier>,
}

impl FineDetector {
    /// Categories this layer is trained on
    pub const CLASSES: [AttackCategory; 3] = [
        AttackCategory::Normal,
        AttackCategory::R2L,
        AttackCategory::U2R,
    ];

    /// Fit on the Normal/R2L/U2R rows of the reduced training matrix
    pub fn fit(x: &Array2<f64>, labels: &[AttackCategory], config: &SvmConfig) -> Result<Self> {
        check_labels(x, labels)?;
        let state = match subset(x, labels, &Self::CLASSES) {
            Some(dataset) => {
                tracing::info!("Fitting {} on {} records", LAYER2, dataset.records().nrows());
                LayerState::Fitted(SvmClassifier::fit(&dataset, config)?)
            }
            None => {
                tracing::info!("No Normal/R2L/U2R records, {} left unfit", LAYER2);
                LayerState::Unfit
            }
        };
        Ok(Self { state })
    }

    /// Detector with no parameters
    pub fn unfit() -> Self {
        Self { state: LayerState::Unfit }
    }

    /// Persisted state
    pub fn state(&self) -> &LayerState<SvmClassifier> {
        &self.state
    }

    /// Whether parameters are present
    pub fn is_fitted(&self) -> bool {
        self.state.is_fitted()
    }

    /// Class probabilities for one reduced row
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> Result<ClassProbabilities> {
        let model = self.state.model(LAYER2)?;
        ClassProbabilities::new(model.classes().to_vec(), model.predict_proba(row)?)
    }

    /// Structural checks against the reduced width
    pub fn validate(&self, width: usize) -> Result<()> {
        if let LayerState::Fitted(model) = &self.state {
            model.validate()?;
            if model.n_features() != width {
                return Err(DlhaError::CorruptBundle(format!(
                    "{} expects width {}, reducer produces {}",
                    LAYER2,
                    model.n_features(),
                    width
                )));
            }
        }
        Ok(())
    }
}

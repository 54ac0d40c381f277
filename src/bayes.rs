//! Gaussian Naive Bayes

use crate::features::AttackCategory;
use crate::{DlhaError, Result};
use linfa::DatasetBase;
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};

/// Relative variance floor, as a fraction of the largest feature variance
const VAR_SMOOTHING: f64 = 1e-9;

/// Training matrix with one category label per row
pub type TrainingSet = DatasetBase<Array2<f64>, Array1<AttackCategory>>;

/// Gaussian naive Bayes classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianNb {
    classes: Vec<AttackCategory>,
    priors: Vec<f64>,
    /// Per-class feature means (class x feature)
    means: Array2<f64>,
    /// Per-class feature variances (class x feature), smoothed
    variances: Array2<f64>,
}

impl GaussianNb {
    /// Fit class priors and per-feature Gaussians
    pub fn fit(dataset: &TrainingSet) -> Result<Self> {
        let x = dataset.records();
        let y = dataset.targets();
        let (n, d) = x.dim();
        if n == 0 {
            return Err(DlhaError::EmptyTrainingSet);
        }

        let mut classes: Vec<AttackCategory> = y.iter().copied().collect();
        classes.sort();
        classes.dedup();

        let epsilon = VAR_SMOOTHING
            * x.var_axis(Axis(0), 0.0)
                .iter()
                .copied()
                .fold(0.0_f64, f64::max);

        let mut priors = Vec::with_capacity(classes.len());
        let mut means = Array2::zeros((classes.len(), d));
        let mut variances = Array2::zeros((classes.len(), d));

        for (c, class) in classes.iter().enumerate() {
            let rows: Vec<usize> = (0..n).filter(|&i| y[i] == *class).collect();
            let subset = x.select(Axis(0), &rows);

            priors.push(rows.len() as f64 / n as f64);
            means
                .row_mut(c)
                .assign(&subset.mean_axis(Axis(0)).ok_or(DlhaError::EmptyTrainingSet)?);
            variances
                .row_mut(c)
                .assign(&subset.var_axis(Axis(0), 0.0).mapv(|v| v + epsilon));
        }

        // A zero floor (all-constant features) would make every density degenerate
        if variances.iter().any(|v| !(*v > 0.0)) {
            variances.mapv_inplace(|v| if v > 0.0 { v } else { f64::EPSILON });
        }

        Ok(Self { classes, priors, means, variances })
    }

    /// Classes in probability order
    pub fn classes(&self) -> &[AttackCategory] {
        &self.classes
    }

    /// Input width
    pub fn n_features(&self) -> usize {
        self.means.ncols()
    }

    /// Posterior class probabilities for one row
    pub fn predict_proba(&self, row: ArrayView1<f64>) -> Result<Vec<f64>> {
        if row.len() != self.n_features() {
            return Err(DlhaError::ShapeMismatch {
                expected: self.n_features(),
                actual: row.len(),
            });
        }

        let mut joint = Vec::with_capacity(self.classes.len());
        for c in 0..self.classes.len() {
            let mut log_likelihood = self.priors[c].ln();
            for (j, &value) in row.iter().enumerate() {
                let density = Normal::new(self.means[[c, j]], self.variances[[c, j]].sqrt())
                    .map_err(|e| DlhaError::Numerical(format!("invalid Gaussian: {}", e)))?;
                log_likelihood += density.ln_pdf(value);
            }
            joint.push(log_likelihood);
        }

        softmax(&joint)
    }

    /// Structural checks for a deserialized model
    pub fn validate(&self) -> Result<()> {
        let k = self.classes.len();
        if k == 0
            || self.priors.len() != k
            || self.means.nrows() != k
            || self.variances.dim() != self.means.dim()
        {
            return Err(DlhaError::CorruptBundle(format!(
                "naive Bayes parameters inconsistent with {} classes",
                k
            )));
        }
        if self.variances.iter().any(|v| !(v.is_finite() && *v > 0.0)) {
            return Err(DlhaError::CorruptBundle("naive Bayes variances must be positive".into()));
        }
        Ok(())
    }
}

/// Normalize log-joint scores into probabilities (log-sum-exp)
pub(crate) fn softmax(log_scores: &[f64]) -> Result<Vec<f64>> {
    let max = log_scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return Err(DlhaError::Numerical("no finite class likelihood".into()));
    }
    let exp: Vec<f64> = log_scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exp.iter().sum();
    Ok(exp.into_iter().map(|e| e / total).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn dos_probe_set() -> TrainingSet {
        let records = array![
            [5.0, 0.1],
            [5.2, 0.0],
            [4.8, 0.2],
            [5.1, 0.1],
            [-3.0, 2.0],
            [-3.2, 2.1],
            [-2.9, 1.8],
        ];
        let targets = array![
            AttackCategory::DoS,
            AttackCategory::DoS,
            AttackCategory::DoS,
            AttackCategory::DoS,
            AttackCategory::Probe,
            AttackCategory::Probe,
            AttackCategory::Probe,
        ];
        DatasetBase::new(records, targets)
    }

    #[test]
    fn test_fit_priors_and_classes() {
        let model = GaussianNb::fit(&dos_probe_set()).unwrap();
        assert_eq!(model.classes(), [AttackCategory::DoS, AttackCategory::Probe]);
        assert!((model.priors[0] - 4.0 / 7.0).abs() < 1e-12);
        assert!((model.means[[1, 0]] + 3.0333).abs() < 1e-3);
    }

    #[test]
    fn test_predict_proba() {
        let model = GaussianNb::fit(&dos_probe_set()).unwrap();

        let dos = model.predict_proba(array![5.0, 0.1].view()).unwrap();
        assert_eq!(dos.len(), 2);
        assert!(dos[0] > 0.99);
        assert!((dos.iter().sum::<f64>() - 1.0).abs() < 1e-9);

        let probe = model.predict_proba(array![-3.0, 2.0].view()).unwrap();
        assert!(probe[1] > 0.99);
    }

    #[test]
    fn test_single_class() {
        let dataset = DatasetBase::new(
            array![[1.0, 2.0], [1.5, 2.5]],
            array![AttackCategory::DoS, AttackCategory::DoS],
        );
        let model = GaussianNb::fit(&dataset).unwrap();
        assert_eq!(model.predict_proba(array![1.2, 2.2].view()).unwrap(), vec![1.0]);
    }

    #[test]
    fn test_width_mismatch() {
        let model = GaussianNb::fit(&dos_probe_set()).unwrap();
        assert!(matches!(
            model.predict_proba(array![1.0].view()),
            Err(DlhaError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_softmax() {
        let p = softmax(&[0.0, 0.0]).unwrap();
        assert_eq!(p, vec![0.5, 0.5]);
        assert!(softmax(&[f64::NEG_INFINITY]).is_err());
    }
}

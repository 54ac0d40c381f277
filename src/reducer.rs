//! Dimensionality Reducer (PCA)

use crate::{DlhaError, Result};
use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};

/// Principal component projection fit on the scaled training matrix.
///
/// Keeps the fewest leading components whose cumulative explained variance
/// ratio exceeds the target. Each component is sign-normalised so its
/// largest-magnitude loading is positive, making refits reproducible.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PcaReducer {
    mean: Array1<f64>,
    /// One component per row
    components: Array2<f64>,
    explained_variance_ratio: Vec<f64>,
}

impl PcaReducer {
    /// Fit on training data and project it
    pub fn fit_transform(x: &Array2<f64>, variance_target: f64) -> Result<(Self, Array2<f64>)> {
        let (n, d) = x.dim();
        if n == 0 || d == 0 {
            return Err(DlhaError::EmptyTrainingSet);
        }
        if !(variance_target > 0.0 && variance_target <= 1.0) {
            return Err(DlhaError::Config(format!(
                "variance target must be in (0, 1], got {}",
                variance_target
            )));
        }

        let mean = x.mean_axis(Axis(0)).ok_or(DlhaError::EmptyTrainingSet)?;
        let centered = x - &mean;
        let covariance = centered.t().dot(&centered) / (n.saturating_sub(1).max(1)) as f64;

        let eigen = SymmetricEigen::new(DMatrix::from_fn(d, d, |i, j| covariance[[i, j]]));

        // Descending eigenvalue order
        let mut order: Vec<usize> = (0..d).collect();
        order.sort_by(|&a, &b| eigen.eigenvalues[b].total_cmp(&eigen.eigenvalues[a]));

        let variances: Vec<f64> = order.iter().map(|&i| eigen.eigenvalues[i].max(0.0)).collect();
        let total: f64 = variances.iter().sum();
        if !total.is_finite() {
            return Err(DlhaError::Numerical("non-finite covariance spectrum".into()));
        }

        let ratios: Vec<f64> = if total > 0.0 {
            variances.iter().map(|v| v / total).collect()
        } else {
            // Constant input: a single (arbitrary) axis carries everything
            let mut ratios = vec![0.0; d];
            ratios[0] = 1.0;
            ratios
        };
        let k = components_for(&ratios, variance_target);

        let mut components = Array2::zeros((k, d));
        for (row, &col) in order.iter().take(k).enumerate() {
            let vector = eigen.eigenvectors.column(col);
            let pivot = vector
                .iter()
                .copied()
                .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best });
            let sign = if pivot < 0.0 { -1.0 } else { 1.0 };
            for j in 0..d {
                components[[row, j]] = sign * vector[j];
            }
        }

        tracing::debug!(
            "PCA kept {} of {} components ({:.4} variance)",
            k,
            d,
            ratios.iter().take(k).sum::<f64>()
        );

        let reducer = Self {
            mean,
            components,
            explained_variance_ratio: ratios.into_iter().take(k).collect(),
        };
        let reduced = reducer.project(x);
        Ok((reducer, reduced))
    }

    /// Project with the frozen basis
    pub fn transform(&self, x: &Array2<f64>) -> Result<Array2<f64>> {
        if x.ncols() != self.input_width() {
            return Err(DlhaError::ShapeMismatch {
                expected: self.input_width(),
                actual: x.ncols(),
            });
        }
        Ok(self.project(x))
    }

    /// Width the reducer was fit on
    pub fn input_width(&self) -> usize {
        self.mean.len()
    }

    /// Number of retained components
    pub fn n_components(&self) -> usize {
        self.components.nrows()
    }

    /// Explained variance ratio of each retained component
    pub fn explained_variance_ratio(&self) -> &[f64] {
        &self.explained_variance_ratio
    }

    /// Structural checks for a deserialized reducer
    pub fn validate(&self) -> Result<()> {
        if self.components.ncols() != self.mean.len() || self.n_components() == 0 {
            return Err(DlhaError::CorruptBundle(format!(
                "reducer basis {:?} does not match input width {}",
                self.components.dim(),
                self.mean.len()
            )));
        }
        Ok(())
    }

    fn project(&self, x: &Array2<f64>) -> Array2<f64> {
        (x - &self.mean).dot(&self.components.t())
    }
}

/// Smallest component count whose cumulative ratio exceeds the target
fn components_for(ratios: &[f64], target: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, ratio) in ratios.iter().enumerate() {
        cumulative += ratio;
        if cumulative > target {
            return i + 1;
        }
    }
    ratios.len()
}

//! Arbitration Router
//!
//! Reconciles the two layers into one verdict per record. Layer-1 decides
//! when its top probability clears the threshold; otherwise Layer-2's
//! arg-max wins. Per-record failures become `Unknown` with confidence 0.

use crate::config::{ConfidenceMode, PipelineConfig};
use crate::features::Verdict;
use crate::models::{ClassProbabilities, CoarseDetector, FineDetector};
use crate::Result;
use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

/// Final label and confidence for one record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Verdict
    pub label: Verdict,
    /// Confidence in `[0, 1]`
    pub confidence: f64,
}

impl Prediction {
    /// Sentinel for a record that could not be classified
    pub const fn unknown() -> Self {
        Self {
            label: Verdict::Unknown,
            confidence: 0.0,
        }
    }
}

/// Threshold precedence rule between Layer-1 and Layer-2
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ArbitrationRouter {
    threshold: f64,
    confidence_mode: ConfidenceMode,
}

impl ArbitrationRouter {
    /// Create a router
    pub fn new(threshold: f64, confidence_mode: ConfidenceMode) -> Self {
        Self {
            threshold,
            confidence_mode,
        }
    }

    /// Router for the configured pipeline
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.arbitration_threshold, config.confidence_mode)
    }

    /// Layer-1 decision threshold
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Confidence semantics
    pub fn confidence_mode(&self) -> ConfidenceMode {
        self.confidence_mode
    }

    /// Combine both layers' probabilities into one prediction
    pub fn arbitrate(&self, layer1: &ClassProbabilities, layer2: &ClassProbabilities) -> Prediction {
        let m1 = layer1.max();
        let m2 = layer2.max();

        let (category, chosen) = if m1 > self.threshold {
            // Ties between DoS and Probe resolve to Probe
            let category = layer1.argmax_last();
            (category, layer1.get(category))
        } else {
            let category = layer2.argmax_first();
            (category, layer2.get(category))
        };

        let confidence = match self.confidence_mode {
            ConfidenceMode::RawMaximum => m1.max(m2),
            ConfidenceMode::ChosenClass => chosen,
        };

        Prediction {
            label: category.into(),
            confidence: confidence.clamp(0.0, 1.0),
        }
    }

    /// Score one reduced row through both layers
    pub fn route(
        &self,
        layer1: &CoarseDetector,
        layer2: &FineDetector,
        row: ArrayView1<f64>,
    ) -> Result<Prediction> {
        let p1 = layer1.predict_proba(row)?;
        let p2 = layer2.predict_proba(row)?;
        Ok(self.arbitrate(&p1, &p2))
    }

    /// Score every reduced row, absorbing per-record failures
    pub fn route_all(
        &self,
        layer1: &CoarseDetector,
        layer2: &FineDetector,
        reduced: &Array2<f64>,
    ) -> Vec<Prediction> {
        reduced
            .outer_iter()
            .enumerate()
            .map(|(i, row)| match self.route(layer1, layer2, row) {
                Ok(prediction) => prediction,
                Err(e) => {
                    tracing::warn!("Record {} classified Unknown: {}", i, e);
                    Prediction::unknown()
                }
            })
            .collect()
    }
}

impl Default for ArbitrationRouter {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SvmConfig;
    use crate::features::AttackCategory;
    use ndarray::array;

    fn layer1(dos: f64, probe: f64) -> ClassProbabilities {
        ClassProbabilities::new(CoarseDetector::CLASSES.to_vec(), vec![dos, probe]).unwrap()
    }

    fn layer2(normal: f64, r2l: f64, u2r: f64) -> ClassProbabilities {
        ClassProbabilities::new(FineDetector::CLASSES.to_vec(), vec![normal, r2l, u2r]).unwrap()
    }

    #[test]
    fn test_confident_layer1_decides() {
        let router = ArbitrationRouter::default();
        let prediction = router.arbitrate(&layer1(0.81, 0.19), &layer2(0.5, 0.3, 0.2));
        assert_eq!(prediction.label, Verdict::DoS);
        assert!((prediction.confidence - 0.81).abs() < 1e-12);

        // Confidence is the larger maximum even when Layer-1 decides
        let prediction = router.arbitrate(&layer1(0.81, 0.19), &layer2(0.9, 0.05, 0.05));
        assert_eq!(prediction.label, Verdict::DoS);
        assert!((prediction.confidence - 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_uncertain_layer1_defers() {
        let router = ArbitrationRouter::default();
        let prediction = router.arbitrate(&layer1(0.5, 0.5), &layer2(0.6, 0.3, 0.1));
        assert_eq!(prediction.label, Verdict::Normal);
        assert!((prediction.confidence - 0.6).abs() < 1e-12);
    }

    #[test]
    fn test_threshold_is_strict() {
        let router = ArbitrationRouter::default();
        let prediction = router.arbitrate(&layer1(0.2, 0.8), &layer2(0.1, 0.7, 0.2));
        assert_eq!(prediction.label, Verdict::R2L);
        assert!((prediction.confidence - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_layer1_tie_goes_to_probe() {
        let router = ArbitrationRouter::new(0.4, ConfidenceMode::RawMaximum);
        let prediction = router.arbitrate(&layer1(0.5, 0.5), &layer2(0.6, 0.3, 0.1));
        assert_eq!(prediction.label, Verdict::Probe);
    }

    #[test]
    fn test_layer2_tie_goes_to_first() {
        let router = ArbitrationRouter::default();
        let prediction = router.arbitrate(&layer1(0.5, 0.5), &layer2(0.1, 0.45, 0.45));
        assert_eq!(prediction.label, Verdict::R2L);
    }

    #[test]
    fn test_chosen_class_confidence() {
        let router = ArbitrationRouter::new(0.8, ConfidenceMode::ChosenClass);
        let prediction = router.arbitrate(&layer1(0.85, 0.15), &layer2(0.95, 0.03, 0.02));
        assert_eq!(prediction.label, Verdict::DoS);
        assert!((prediction.confidence - 0.85).abs() < 1e-12);

        let prediction = router.arbitrate(&layer1(0.6, 0.4), &layer2(0.2, 0.5, 0.3));
        assert_eq!(prediction.label, Verdict::R2L);
        assert!((prediction.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_unfit_layer1_yields_unknown() {
        let x = array![[0.0, 4.0], [0.1, 4.1], [0.0, -4.0], [0.1, -4.1]];
        let labels = [
            AttackCategory::Normal,
            AttackCategory::Normal,
            AttackCategory::R2L,
            AttackCategory::R2L,
        ];
        let layer2 = FineDetector::fit(&x, &labels, &SvmConfig::default()).unwrap();
        let layer1 = CoarseDetector::unfit();

        let predictions = ArbitrationRouter::default().route_all(&layer1, &layer2, &x);
        assert_eq!(predictions.len(), 4);
        assert!(predictions.iter().all(|p| *p == Prediction::unknown()));
    }

    #[test]
    fn test_unfit_layer2_overrides_confident_layer1() {
        let x = array![
            [4.0, 0.0],
            [4.1, 0.1],
            [3.9, -0.1],
            [-4.0, 0.0],
            [-4.1, 0.1],
            [-3.9, -0.1],
        ];
        let labels = [
            AttackCategory::DoS,
            AttackCategory::DoS,
            AttackCategory::DoS,
            AttackCategory::Probe,
            AttackCategory::Probe,
            AttackCategory::Probe,
        ];
        let layer1 = CoarseDetector::fit(&x, &labels).unwrap();
        for row in x.outer_iter() {
            assert!(layer1.predict_proba(row).unwrap().max() > 0.8);
        }

        let predictions = ArbitrationRouter::default().route_all(&layer1, &FineDetector::unfit(), &x);
        assert_eq!(predictions, vec![Prediction::unknown(); 6]);
    }

    #[test]
    fn test_both_layers_unfit() {
        let predictions = ArbitrationRouter::default().route_all(
            &CoarseDetector::unfit(),
            &FineDetector::unfit(),
            &array![[1.0], [2.0]],
        );
        assert_eq!(predictions, vec![Prediction::unknown(); 2]);
    }
}

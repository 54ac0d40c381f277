//! Training and Evaluation

use crate::bundle::ModelBundle;
use crate::config::DetectorConfig;
use crate::dataset::category_counts;
use crate::features::{AttackCategory, ConnectionRecord, LabeledRecord, Verdict};
use crate::models::{CoarseDetector, FineDetector};
use crate::normalizer::FeatureNormalizer;
use crate::reducer::PcaReducer;
use crate::router::{ArbitrationRouter, Prediction};
use crate::{DlhaError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Verdict columns of the confusion matrix, `Unknown` last
pub const VERDICT_ORDER: [Verdict; 6] = [
    Verdict::DoS,
    Verdict::Normal,
    Verdict::Probe,
    Verdict::R2L,
    Verdict::U2R,
    Verdict::Unknown,
];

/// Fits every pipeline stage from labeled records
pub struct Trainer {
    config: DetectorConfig,
}

impl Trainer {
    /// Create a trainer
    pub fn new(config: DetectorConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    /// Router matching the configured arbitration settings
    pub fn router(&self) -> ArbitrationRouter {
        ArbitrationRouter::from_config(&self.config.pipeline)
    }

    /// Fit normalizer and reducer on everything, then each layer on its subset
    pub fn train(&self, records: &[LabeledRecord]) -> Result<ModelBundle> {
        if records.is_empty() {
            return Err(DlhaError::EmptyTrainingSet);
        }

        for (category, count) in category_counts(records) {
            tracing::info!("Training records: {} = {}", category, count);
        }

        let features: Vec<ConnectionRecord> = records.iter().map(|r| r.record.clone()).collect();
        let labels: Vec<AttackCategory> = records.iter().map(|r| r.label).collect();

        let (normalizer, scaled) = FeatureNormalizer::fit_transform(&features)?;
        let (reducer, reduced) =
            PcaReducer::fit_transform(&scaled, self.config.pipeline.variance_target)?;
        if reduced.iter().any(|v| !v.is_finite()) {
            return Err(DlhaError::Numerical("non-finite values after reduction".into()));
        }
        tracing::info!(
            "Reduced {} features to {} components",
            normalizer.width(),
            reducer.n_components()
        );

        let layer1 = CoarseDetector::fit(&reduced, &labels)?;
        let layer2 = FineDetector::fit(&reduced, &labels, &self.config.svm)?;

        ModelBundle::from_parts(normalizer, reducer, layer1, layer2)
    }

    /// Score a labeled set with a trained bundle
    pub fn evaluate(&self, bundle: &ModelBundle, records: &[LabeledRecord]) -> Result<EvaluationReport> {
        if records.is_empty() {
            return Err(DlhaError::Dataset("evaluation set is empty".into()));
        }
        let features: Vec<ConnectionRecord> = records.iter().map(|r| r.record.clone()).collect();
        let predictions = bundle.predict(&self.router(), &features)?;
        let truth: Vec<AttackCategory> = records.iter().map(|r| r.label).collect();
        Ok(EvaluationReport::from_predictions(&truth, &predictions))
    }
}

/// Precision, recall and F1 for one category
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    /// Correct / predicted as this class
    pub precision: f64,
    /// Correct / actually this class
    pub recall: f64,
    /// Harmonic mean of precision and recall
    pub f1_score: f64,
    /// Records actually of this class
    pub support: usize,
}

/// Evaluation summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationReport {
    /// Records evaluated
    pub total: usize,
    /// Fraction labeled correctly
    pub accuracy: f64,
    /// Mean reported confidence
    pub mean_confidence: f64,
    /// Records that came back `Unknown`
    pub unknown: usize,
    /// Rows are true categories, columns follow [`VERDICT_ORDER`]
    pub confusion_matrix: Vec<Vec<usize>>,
    /// Per-category metrics
    pub per_class: BTreeMap<AttackCategory, ClassMetrics>,
    /// When the report was produced
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationReport {
    /// Build from ground truth and predictions of equal length
    pub fn from_predictions(truth: &[AttackCategory], predictions: &[Prediction]) -> Self {
        let mut confusion = vec![vec![0usize; VERDICT_ORDER.len()]; AttackCategory::ALL.len()];
        for (actual, prediction) in truth.iter().zip(predictions) {
            confusion[actual.index()][verdict_column(prediction.label)] += 1;
        }

        let total = truth.len().min(predictions.len());
        let correct: usize = AttackCategory::ALL
            .iter()
            .map(|c| confusion[c.index()][verdict_column((*c).into())])
            .sum();
        let unknown = predictions.iter().filter(|p| p.label == Verdict::Unknown).count();
        let mean_confidence = if predictions.is_empty() {
            0.0
        } else {
            predictions.iter().map(|p| p.confidence).sum::<f64>() / predictions.len() as f64
        };

        let mut per_class = BTreeMap::new();
        for category in AttackCategory::ALL {
            let column = verdict_column(category.into());
            let hits = confusion[category.index()][column];
            let support: usize = confusion[category.index()].iter().sum();
            let predicted: usize = confusion.iter().map(|row| row[column]).sum();

            let precision = ratio(hits, predicted);
            let recall = ratio(hits, support);
            let f1_score = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            per_class.insert(
                category,
                ClassMetrics {
                    precision,
                    recall,
                    f1_score,
                    support,
                },
            );
        }

        Self {
            total,
            accuracy: ratio(correct, total),
            mean_confidence,
            unknown,
            confusion_matrix: confusion,
            per_class,
            evaluated_at: Utc::now(),
        }
    }
}

impl fmt::Display for EvaluationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{:>10} {:>10} {:>10} {:>10} {:>10}", "", "precision", "recall", "f1-score", "support")?;
        for (category, m) in &self.per_class {
            writeln!(
                f,
                "{:>10} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                category.as_str(),
                m.precision,
                m.recall,
                m.f1_score,
                m.support
            )?;
        }

        writeln!(f)?;
        write!(f, "{:>10}", "")?;
        for verdict in VERDICT_ORDER {
            write!(f, " {:>8}", verdict.as_str())?;
        }
        writeln!(f)?;
        for category in AttackCategory::ALL {
            write!(f, "{:>10}", category.as_str())?;
            for count in &self.confusion_matrix[category.index()] {
                write!(f, " {:>8}", count)?;
            }
            writeln!(f)?;
        }

        writeln!(f)?;
        writeln!(f, "Accuracy: {:.4} ({} records, {} unknown)", self.accuracy, self.total, self.unknown)?;
        write!(f, "Average confidence: {:.4}", self.mean_confidence)
    }
}

fn verdict_column(verdict: Verdict) -> usize {
    VERDICT_ORDER
        .iter()
        .position(|v| *v == verdict)
        .unwrap_or(VERDICT_ORDER.len() - 1)
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use crate::features::{
        AttackCategory, ConnectionFlag, ConnectionRecord, LabeledRecord, NumericField, ProtocolType,
    };

    /// Small, well-separated records for every category
    pub fn labeled_records() -> Vec<LabeledRecord> {
        let mut records = Vec::new();
        for i in 0..8 {
            let v = i as f64;

            records.push(LabeledRecord {
                record: ConnectionRecord::new(ProtocolType::Tcp, "private", ConnectionFlag::S0)
                    .with(NumericField::Count, 200.0 + 5.0 * v)
                    .with(NumericField::SerrorRate, 1.0)
                    .with(NumericField::DstHostSerrorRate, 0.95 + 0.005 * v),
                label: AttackCategory::DoS,
            });
            records.push(LabeledRecord {
                record: ConnectionRecord::new(ProtocolType::Icmp, "eco_i", ConnectionFlag::Sf)
                    .with(NumericField::SrcBytes, 8.0 + v)
                    .with(NumericField::DstHostDiffSrvRate, 0.8 + 0.02 * v)
                    .with(NumericField::DstHostSameSrcPortRate, 0.9),
                label: AttackCategory::Probe,
            });
            records.push(LabeledRecord {
                record: ConnectionRecord::new(ProtocolType::Tcp, "http", ConnectionFlag::Sf)
                    .with(NumericField::SrcBytes, 220.0 + 15.0 * v)
                    .with(NumericField::DstBytes, 3000.0 + 150.0 * v)
                    .with(NumericField::LoggedIn, 1.0)
                    .with(NumericField::SameSrvRate, 1.0),
                label: AttackCategory::Normal,
            });
            records.push(LabeledRecord {
                record: ConnectionRecord::new(ProtocolType::Tcp, "ftp", ConnectionFlag::Rsto)
                    .with(NumericField::Duration, 40.0 + 4.0 * v)
                    .with(NumericField::NumFailedLogins, 1.0)
                    .with(NumericField::Hot, 2.0 + v),
                label: AttackCategory::R2L,
            });
            records.push(LabeledRecord {
                record: ConnectionRecord::new(ProtocolType::Tcp, "telnet", ConnectionFlag::Sf)
                    .with(NumericField::Duration, 120.0 + 6.0 * v)
                    .with(NumericField::RootShell, 1.0)
                    .with(NumericField::NumFileCreations, 2.0 + (i % 3) as f64)
                    .with(NumericField::LoggedIn, 1.0),
                label: AttackCategory::U2R,
            });
        }
        records
    }
}

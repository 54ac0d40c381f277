//! Fitted Model Bundle

use crate::features::{ConnectionRecord, Verdict};
use crate::models::{CoarseDetector, FineDetector};
use crate::normalizer::FeatureNormalizer;
use crate::reducer::PcaReducer;
use crate::router::{ArbitrationRouter, Prediction};
use crate::{DlhaError, Result};
use ndarray::Array2;

/// Everything inference needs, fitted together and immutable afterwards
#[derive(Debug, Clone, PartialEq)]
pub struct ModelBundle {
    normalizer: FeatureNormalizer,
    reducer: PcaReducer,
    layer1: CoarseDetector,
    layer2: FineDetector,
}

impl ModelBundle {
    /// Assemble a bundle, checking that the stages agree on widths
    pub fn from_parts(
        normalizer: FeatureNormalizer,
        reducer: PcaReducer,
        layer1: CoarseDetector,
        layer2: FineDetector,
    ) -> Result<Self> {
        reducer.validate()?;
        if reducer.input_width() != normalizer.width() {
            return Err(DlhaError::CorruptBundle(format!(
                "reducer expects width {}, normalizer produces {}",
                reducer.input_width(),
                normalizer.width()
            )));
        }
        layer1.validate(reducer.n_components())?;
        layer2.validate(reducer.n_components())?;

        Ok(Self {
            normalizer,
            reducer,
            layer1,
            layer2,
        })
    }

    /// Feature normalizer
    pub fn normalizer(&self) -> &FeatureNormalizer {
        &self.normalizer
    }

    /// Dimensionality reducer
    pub fn reducer(&self) -> &PcaReducer {
        &self.reducer
    }

    /// Layer-1 detector
    pub fn layer1(&self) -> &CoarseDetector {
        &self.layer1
    }

    /// Layer-2 detector
    pub fn layer2(&self) -> &FineDetector {
        &self.layer2
    }

    /// Normalize and project records
    pub fn reduce(&self, records: &[ConnectionRecord]) -> Result<Array2<f64>> {
        self.reducer.transform(&self.normalizer.transform(records))
    }

    /// Label and confidence per record
    pub fn predict(&self, router: &ArbitrationRouter, records: &[ConnectionRecord]) -> Result<Vec<Prediction>> {
        let reduced = self.reduce(records)?;
        Ok(router.route_all(&self.layer1, &self.layer2, &reduced))
    }

    /// Label per record
    pub fn classify(&self, router: &ArbitrationRouter, records: &[ConnectionRecord]) -> Result<Vec<Verdict>> {
        Ok(self.predict(router, records)?.into_iter().map(|p| p.label).collect())
    }

    /// Confidence per record
    pub fn score(&self, router: &ArbitrationRouter, records: &[ConnectionRecord]) -> Result<Vec<f64>> {
        Ok(self
            .predict(router, records)?
            .into_iter()
            .map(|p| p.confidence)
            .collect())
    }
}

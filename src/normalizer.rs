//! Feature Normalizer
//!
//! Turns connection records into a fixed-width, standardized matrix:
//! categorical columns go through per-field vocabularies, missing numeric
//! values are imputed with training means, and every column is scaled to
//! zero mean / unit variance using statistics frozen at fit time.

use crate::features::{
    CategoricalField, ConnectionRecord, Field, NumericField, FIELD_COUNT, NUMERIC_FIELD_COUNT,
};
use crate::{DlhaError, Result};
use ndarray::{Array1, Array2, Axis};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// Sorted vocabulary for one categorical field.
///
/// Index 0 doubles as the fallback for values never seen during training.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct CategoryEncoder {
    classes: Vec<String>,
    index: HashMap<String, usize>,
}

impl CategoryEncoder {
    /// Fit a vocabulary from observed values
    pub fn fit<'a, I>(values: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let classes: BTreeSet<&str> = values.into_iter().collect();
        Self::from(classes.into_iter().map(str::to_string).collect::<Vec<_>>())
    }

    /// Strict lookup
    pub fn try_encode(&self, field: CategoricalField, value: &str) -> Result<usize> {
        self.index
            .get(value)
            .copied()
            .ok_or_else(|| DlhaError::UnknownCategory {
                field: field.name(),
                value: value.to_string(),
            })
    }

    /// Lookup with fallback to the first class for unseen values
    pub fn encode(&self, field: CategoricalField, value: &str) -> usize {
        match self.try_encode(field, value) {
            Ok(code) => code,
            Err(e) => {
                tracing::debug!("{}, using fallback '{}'", e, self.fallback());
                0
            }
        }
    }

    /// Fallback class
    pub fn fallback(&self) -> &str {
        self.classes.first().map(String::as_str).unwrap_or_default()
    }

    /// Known classes in code order
    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    /// Vocabulary size
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// Whether the vocabulary is empty
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

impl From<Vec<String>> for CategoryEncoder {
    fn from(classes: Vec<String>) -> Self {
        let index = classes
            .iter()
            .enumerate()
            .map(|(i, class)| (class.clone(), i))
            .collect();
        Self { classes, index }
    }
}

impl From<CategoryEncoder> for Vec<String> {
    fn from(encoder: CategoryEncoder) -> Self {
        encoder.classes
    }
}

/// Vocabularies for all three categorical fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryEncoders {
    /// `protocol_type` vocabulary
    pub protocol_type: CategoryEncoder,
    /// `service` vocabulary
    pub service: CategoryEncoder,
    /// `flag` vocabulary
    pub flag: CategoryEncoder,
}

impl CategoryEncoders {
    /// Fit all vocabularies on training records
    pub fn fit(records: &[ConnectionRecord]) -> Self {
        let fit_field = |field| CategoryEncoder::fit(records.iter().map(|r| r.categorical(field)));
        Self {
            protocol_type: fit_field(CategoricalField::ProtocolType),
            service: fit_field(CategoricalField::Service),
            flag: fit_field(CategoricalField::Flag),
        }
    }

    /// Encoder for a field
    pub fn get(&self, field: CategoricalField) -> &CategoryEncoder {
        match field {
            CategoricalField::ProtocolType => &self.protocol_type,
            CategoricalField::Service => &self.service,
            CategoricalField::Flag => &self.flag,
        }
    }

    /// Encode a record's categorical value, falling back for unseen values
    pub fn encode(&self, record: &ConnectionRecord, field: CategoricalField) -> usize {
        self.get(field).encode(field, record.categorical(field))
    }
}

/// Frozen imputation and scaling statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScalingState {
    /// Training mean per numeric field, used to fill missing values
    pub impute_means: Vec<f64>,
    /// Column means of the encoded training matrix
    pub mean: Array1<f64>,
    /// Column standard deviations (1.0 for constant columns)
    pub scale: Array1<f64>,
}

/// Fitted feature normalizer.
///
/// Only obtainable through [`FeatureNormalizer::fit_transform`] or by
/// reassembling persisted parts, so `transform` never runs unfitted.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureNormalizer {
    encoders: CategoryEncoders,
    scaling: ScalingState,
}

impl FeatureNormalizer {
    /// Fit on the training set and return the scaled training matrix
    pub fn fit_transform(records: &[ConnectionRecord]) -> Result<(Self, Array2<f64>)> {
        if records.is_empty() {
            return Err(DlhaError::EmptyTrainingSet);
        }

        let encoders = CategoryEncoders::fit(records);
        let impute_means = impute_means(records);
        let encoded = encode_matrix(records, &encoders, &impute_means);

        let mean = encoded
            .mean_axis(Axis(0))
            .ok_or(DlhaError::EmptyTrainingSet)?;
        let scale = encoded
            .std_axis(Axis(0), 0.0)
            .mapv(|s| if s < 10.0 * f64::EPSILON { 1.0 } else { s });

        tracing::debug!(
            "Normalizer fit on {} records ({} services, {} flags)",
            records.len(),
            encoders.service.len(),
            encoders.flag.len()
        );

        let normalizer = Self {
            encoders,
            scaling: ScalingState { impute_means, mean, scale },
        };
        let scaled = normalizer.scale(encoded);
        Ok((normalizer, scaled))
    }

    /// Reassemble from persisted parts
    pub fn from_parts(encoders: CategoryEncoders, scaling: ScalingState) -> Result<Self> {
        if scaling.impute_means.len() != NUMERIC_FIELD_COUNT
            || scaling.mean.len() != FIELD_COUNT
            || scaling.scale.len() != FIELD_COUNT
        {
            return Err(DlhaError::CorruptBundle(format!(
                "normalizer expects {} numeric means and {} column statistics",
                NUMERIC_FIELD_COUNT, FIELD_COUNT
            )));
        }
        if scaling.scale.iter().any(|s| !(s.is_finite() && *s > 0.0)) {
            return Err(DlhaError::CorruptBundle("normalizer scale must be positive".into()));
        }
        Ok(Self { encoders, scaling })
    }

    /// Transform records with the frozen statistics
    pub fn transform(&self, records: &[ConnectionRecord]) -> Array2<f64> {
        let encoded = encode_matrix(records, &self.encoders, &self.scaling.impute_means);
        self.scale(encoded)
    }

    /// Category vocabularies
    pub fn encoders(&self) -> &CategoryEncoders {
        &self.encoders
    }

    /// Imputation and scaling statistics
    pub fn scaling(&self) -> &ScalingState {
        &self.scaling
    }

    /// Output width
    pub fn width(&self) -> usize {
        FIELD_COUNT
    }

    fn scale(&self, encoded: Array2<f64>) -> Array2<f64> {
        (encoded - &self.scaling.mean) / &self.scaling.scale
    }
}

fn impute_means(records: &[ConnectionRecord]) -> Vec<f64> {
    NumericField::ALL
        .iter()
        .map(|&field| {
            let (sum, count) = records
                .iter()
                .filter_map(|r| r.get(field))
                .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
            // Fully missing column imputes to zero
            if count == 0 { 0.0 } else { sum / count as f64 }
        })
        .collect()
}

fn encode_matrix(
    records: &[ConnectionRecord],
    encoders: &CategoryEncoders,
    impute_means: &[f64],
) -> Array2<f64> {
    let mut matrix = Array2::zeros((records.len(), FIELD_COUNT));

    for (mut row, record) in matrix.axis_iter_mut(Axis(0)).zip(records) {
        for field in Field::schema() {
            row[field.column()] = match field {
                Field::Numeric(f) => record.get(f).unwrap_or(impute_means[f.index()]),
                Field::Categorical(f) => encoders.encode(record, f) as f64,
            };
        }
    }

    matrix
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{ConnectionFlag, ProtocolType};

    fn sample_records() -> Vec<ConnectionRecord> {
        vec![
            ConnectionRecord::new(ProtocolType::Tcp, "http", ConnectionFlag::Sf)
                .with(NumericField::SrcBytes, 200.0)
                .with(NumericField::Count, 2.0),
            ConnectionRecord::new(ProtocolType::Udp, "domain_u", ConnectionFlag::Sf)
                .with(NumericField::SrcBytes, 40.0)
                .with(NumericField::Count, 10.0),
            ConnectionRecord::new(ProtocolType::Tcp, "private", ConnectionFlag::S0)
                .with(NumericField::SrcBytes, 0.0)
                .with(NumericField::Count, 120.0),
            ConnectionRecord::new(ProtocolType::Icmp, "ecr_i", ConnectionFlag::Sf)
                .with(NumericField::SrcBytes, 1032.0)
                .with(NumericField::Count, 511.0),
        ]
    }

    #[test]
    fn test_encoder_sorted_vocabulary() {
        let encoder = CategoryEncoder::fit(["tcp", "udp", "icmp", "tcp"]);
        assert_eq!(encoder.classes(), ["icmp", "tcp", "udp"]);
        assert_eq!(encoder.encode(CategoricalField::ProtocolType, "udp"), 2);
    }

    #[test]
    fn test_unseen_category_falls_back() {
        let encoder = CategoryEncoder::fit(["http", "ftp", "smtp"]);
        assert!(matches!(
            encoder.try_encode(CategoricalField::Service, "xyz123"),
            Err(DlhaError::UnknownCategory { .. })
        ));
        assert_eq!(encoder.encode(CategoricalField::Service, "xyz123"), 0);
        assert_eq!(encoder.fallback(), "ftp");
    }

    #[test]
    fn test_encoder_serde_rebuilds_index() {
        let encoder = CategoryEncoder::fit(["SF", "REJ", "S0"]);
        let json = serde_json::to_string(&encoder).unwrap();
        assert_eq!(json, r#"["REJ","S0","SF"]"#);

        let restored: CategoryEncoder = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, encoder);
        assert_eq!(restored.encode(CategoricalField::Flag, "SF"), 2);
    }

    #[test]
    fn test_fit_transform_standardizes() {
        let (_, scaled) = FeatureNormalizer::fit_transform(&sample_records()).unwrap();
        assert_eq!(scaled.dim(), (4, FIELD_COUNT));

        let src_bytes = scaled.column(Field::Numeric(NumericField::SrcBytes).column());
        assert!(src_bytes.mean().unwrap().abs() < 1e-9);
        assert!((src_bytes.std(0.0) - 1.0).abs() < 1e-9);

        // Constant column stays at zero instead of dividing by zero
        let land = scaled.column(Field::Numeric(NumericField::Land).column());
        assert!(land.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_missing_values_imputed_with_training_mean() {
        let mut records = sample_records();
        records[0].set(NumericField::Hot, Some(4.0));
        records[1].set(NumericField::Hot, Some(8.0));
        records[2].set(NumericField::Hot, None);
        records[3].set(NumericField::Hot, None);
        // Entire column missing
        for r in records.iter_mut() {
            r.set(NumericField::Urgent, None);
        }

        let (normalizer, _) = FeatureNormalizer::fit_transform(&records).unwrap();
        let means = &normalizer.scaling().impute_means;
        assert_eq!(means[NumericField::Hot.index()], 6.0);
        assert_eq!(means[NumericField::Urgent.index()], 0.0);
    }

    #[test]
    fn test_transform_is_deterministic() {
        let records = sample_records();
        let held_out = vec![ConnectionRecord::new(ProtocolType::Tcp, "xyz123", ConnectionFlag::Rej)
            .with(NumericField::SrcBytes, 75.0)];

        let (first, _) = FeatureNormalizer::fit_transform(&records).unwrap();
        let (second, _) = FeatureNormalizer::fit_transform(&records).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.transform(&held_out), second.transform(&held_out));
    }

    #[test]
    fn test_empty_training_set() {
        assert!(matches!(
            FeatureNormalizer::fit_transform(&[]),
            Err(DlhaError::EmptyTrainingSet)
        ));
    }

    #[test]
    fn test_from_parts_validates_widths() {
        let (normalizer, _) = FeatureNormalizer::fit_transform(&sample_records()).unwrap();
        let mut scaling = normalizer.scaling().clone();
        scaling.impute_means.pop();

        let result = FeatureNormalizer::from_parts(normalizer.encoders().clone(), scaling);
        assert!(matches!(result, Err(DlhaError::CorruptBundle(_))));
    }
}

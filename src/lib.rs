//! Dual-Layer Hierarchical Analyzer (DLHA)
//!
//! Two-layer intrusion classifier for NSL-KDD connection records.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    DUAL-LAYER HIERARCHICAL ANALYZER                     │
//! │                                                                         │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     FEATURE NORMALIZER                          │   │
//! │  │   Category encoding | Mean imputation | Standard scaling        │   │
//! │  └──────────────────────────────┬──────────────────────────────────┘   │
//! │                                 │                                       │
//! │  ┌──────────────────────────────▼──────────────────────────────────┐   │
//! │  │                   DIMENSIONALITY REDUCER (PCA)                  │   │
//! │  │                   > 95% explained variance                      │   │
//! │  └───────────────┬─────────────────────────────────┬───────────────┘   │
//! │                  │                                 │                    │
//! │  ┌───────────────▼──────────────┐  ┌───────────────▼───────────────┐   │
//! │  │          LAYER-1             │  │           LAYER-2             │   │
//! │  │   Gaussian NB: DoS, Probe    │  │  RBF SVM: Normal, R2L, U2R    │   │
//! │  └───────────────┬──────────────┘  └───────────────┬───────────────┘   │
//! │                  │                                 │                    │
//! │  ┌───────────────▼─────────────────────────────────▼───────────────┐   │
//! │  │                     ARBITRATION ROUTER                          │   │
//! │  │   Layer-1 max > 0.8 ? Layer-1 : Layer-2   → (label, confidence) │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │                                                                         │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐  ┌─────────────┐ │
//! │  │    Model     │  │  Inference   │  │    Live      │  │    HTTP     │ │
//! │  │    Store     │  │   Engine     │  │   Status     │  │    API      │ │
//! │  │ (atomic JSON)│  │ (hot reload) │  │  (ArcSwap)   │  │   (axum)    │ │
//! │  └──────────────┘  └──────────────┘  └──────────────┘  └─────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]

pub mod api;
pub mod bayes;
pub mod bundle;
pub mod config;
pub mod dataset;
pub mod features;
pub mod inference;
pub mod models;
pub mod monitor;
pub mod normalizer;
pub mod reducer;
pub mod router;
pub mod store;
pub mod svm;
pub mod training;

use thiserror::Error;

pub use bundle::ModelBundle;
pub use config::{ConfidenceMode, DetectorConfig};
pub use features::{AttackCategory, ConnectionRecord, LabeledRecord, RawRecord, RawValue, Verdict};
pub use inference::InferenceEngine;
pub use monitor::LiveStatus;
pub use router::{ArbitrationRouter, Prediction};
pub use store::ModelStore;
pub use training::{EvaluationReport, Trainer};

/// DLHA error types
#[derive(Debug, Error)]
pub enum DlhaError {
    #[error("shape mismatch: expected width {expected}, got {actual}")]
    ShapeMismatch { expected: usize, actual: usize },
    #[error("{0} is not fitted")]
    UnfitModel(&'static str),
    #[error("unknown {field} category '{value}'")]
    UnknownCategory { field: &'static str, value: String },
    #[error("corrupt model bundle: {0}")]
    CorruptBundle(String),
    #[error("invalid record: {0}")]
    InvalidRecord(String),
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("training set is empty")]
    EmptyTrainingSet,
    #[error("dataset error: {0}")]
    Dataset(String),
    #[error("config error: {0}")]
    Config(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result alias
pub type Result<T> = std::result::Result<T, DlhaError>;

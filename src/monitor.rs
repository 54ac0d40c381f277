//! Live Status Cell

use crate::features::Verdict;
use crate::router::Prediction;
use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Coarse traffic status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrafficStatus {
    /// Last verdict was benign
    Normal,
    /// Last verdict named an attack family
    Alert,
    /// Nothing classified yet, or the last record could not be classified
    Unknown,
}

impl From<Verdict> for TrafficStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Normal => TrafficStatus::Normal,
            Verdict::Unknown => TrafficStatus::Unknown,
            _ => TrafficStatus::Alert,
        }
    }
}

/// Most recent verdict, as seen by status readers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    /// Coarse status
    pub status: TrafficStatus,
    /// Last label
    pub label: Verdict,
    /// Last confidence
    pub confidence: f64,
    /// Records published so far
    pub record_count: u64,
    /// Source address of the last record, if supplied
    pub last_source: Option<String>,
    /// Destination address of the last record, if supplied
    pub last_destination: Option<String>,
    /// When the snapshot was taken
    pub updated_at: DateTime<Utc>,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            status: TrafficStatus::Unknown,
            label: Verdict::Unknown,
            confidence: 0.0,
            record_count: 0,
            last_source: None,
            last_destination: None,
            updated_at: Utc::now(),
        }
    }
}

/// Lock-free single-snapshot cell shared between the scorer and readers
#[derive(Debug)]
pub struct LiveStatus {
    current: ArcSwap<StatusSnapshot>,
}

impl LiveStatus {
    /// Empty status
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(StatusSnapshot::default()),
        }
    }

    /// Publish a new verdict
    pub fn publish(&self, prediction: &Prediction, source: Option<&str>, destination: Option<&str>) {
        self.current.rcu(|previous| StatusSnapshot {
            status: prediction.label.into(),
            label: prediction.label,
            confidence: prediction.confidence,
            record_count: previous.record_count + 1,
            last_source: source.map(str::to_string),
            last_destination: destination.map(str::to_string),
            updated_at: Utc::now(),
        });

        if prediction.label.is_attack() {
            tracing::warn!(
                "Attack detected: {} ({:.3}) {} -> {}",
                prediction.label,
                prediction.confidence,
                source.unwrap_or("-"),
                destination.unwrap_or("-")
            );
        }
    }

    /// Current snapshot
    pub fn snapshot(&self) -> Arc<StatusSnapshot> {
        self.current.load_full()
    }
}

impl Default for LiveStatus {
    fn default() -> Self {
        Self::new()
    }
}
